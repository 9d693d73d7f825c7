//! HTTP(S) protocol driver built on reqwest.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, RANGE};
use reqwest::{Client, Proxy, Response, StatusCode};
use tracing::debug;
use url::Url;

use super::{ChunkStream, Fetch, Probe, Transport};
use crate::config::Settings;
use crate::download::error::TransferError;

/// Statuses accepted from the HEAD preflight.
const ACCEPTED_PROBE_STATUSES: [u16; 3] = [200, 301, 302];

/// Transient statuses retried automatically before surfacing an error.
const STATUS_FORCELIST: [u16; 5] = [429, 500, 502, 503, 504];

/// Base delay of the automatic retry schedule (1s, 2s, 3s, ...).
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// HTTP and HTTPS transfers: HEAD preflight, ranged GET for resume, and
/// automatic bounded retry of transient failures.
pub struct HttpTransport;

#[async_trait]
impl Transport for HttpTransport {
    async fn probe(&self, url: &Url, settings: &Settings) -> Result<Probe, TransferError> {
        let client = build_client(settings)?;
        let response =
            send_with_retry(|| client.head(url.clone()), settings.max_retries).await?;

        let code = response.status().as_u16();
        if !ACCEPTED_PROBE_STATUSES.contains(&code) {
            return Err(TransferError::protocol(code));
        }

        let total_size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_disposition);

        Ok(Probe {
            total_size,
            filename,
        })
    }

    async fn fetch(
        &self,
        url: &Url,
        settings: &Settings,
        offset: u64,
    ) -> Result<Fetch, TransferError> {
        let client = build_client(settings)?;
        let response = send_with_retry(
            || {
                let mut request = client.get(url.clone());
                if offset > 0 {
                    request = request.header(RANGE, format!("bytes={offset}-"));
                }
                request
            },
            settings.max_retries,
        )
        .await?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(TransferError::protocol(status.as_u16()));
        }

        // 206 confirms the range was honored; a plain 200 restarts the full
        // body from byte 0 and the worker must truncate instead of append.
        let resume_accepted = status == StatusCode::PARTIAL_CONTENT;

        let stream: ChunkStream =
            Box::pin(response.bytes_stream().map_err(TransferError::network));

        Ok(Fetch {
            stream,
            resume_accepted,
        })
    }
}

/// Build a client honoring the task's settings snapshot.
fn build_client(settings: &Settings) -> Result<Client, TransferError> {
    let mut builder = Client::builder()
        .user_agent(settings.user_agent.clone())
        .connect_timeout(settings.timeout())
        .read_timeout(settings.timeout());

    if !settings.verify_tls {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(proxy) = &settings.proxy {
        builder = builder.proxy(Proxy::all(proxy.url()).map_err(TransferError::network)?);
    }

    builder.build().map_err(TransferError::network)
}

/// Send a request, retrying forcelist statuses and connection-level failures
/// with a linearly growing delay, up to `max_retries` extra attempts.
///
/// This retry loop is internal to the transport; the task state machine never
/// observes it unless every attempt fails.
async fn send_with_retry<F>(build: F, max_retries: u32) -> Result<Response, TransferError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt: u32 = 0;
    loop {
        let result = build().send().await;

        let transient = match &result {
            Ok(response) => STATUS_FORCELIST.contains(&response.status().as_u16()),
            Err(err) => err.is_connect() || err.is_timeout(),
        };

        if !transient || attempt >= max_retries {
            return result.map_err(TransferError::network);
        }

        attempt += 1;
        let delay = RETRY_BASE_DELAY * attempt;
        debug!(
            attempt,
            delay_secs = delay.as_secs(),
            "transient failure, backing off before retry"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Extract the `filename="..."` value from a Content-Disposition header.
fn parse_content_disposition(value: &str) -> Option<String> {
    let start = value.find("filename=")? + "filename=".len();
    let raw = value[start..].split(';').next().unwrap_or("").trim();
    let name = raw.trim_matches(|c| c == '"' || c == '\'');
    (!name.is_empty()).then(|| name.to_string())
}
