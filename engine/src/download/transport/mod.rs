//! Protocol drivers behind a common capability trait.
//!
//! A [`Transport`] knows how to preflight a resource (`probe`) and to open a
//! byte stream from an offset (`fetch`). The engine picks the driver from the
//! URL scheme; adding a protocol means adding a variant here, call sites stay
//! untouched.

mod ftp;
mod http;

pub use ftp::FtpTransport;
pub use http::HttpTransport;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use url::Url;

use crate::config::Settings;
use crate::download::error::TransferError;
use crate::download::task::Scheme;

/// A lazy, finite, non-restartable sequence of byte chunks. Dropping it early
/// (on cancel) only truncates the attempt; the worker owns all file writes.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransferError>> + Send>>;

/// Result of a preflight check.
#[derive(Debug, Clone)]
pub struct Probe {
    /// Resource size when the server reports one.
    pub total_size: Option<u64>,
    /// Server-suggested filename, overriding the URL-derived one.
    pub filename: Option<String>,
}

/// An opened transfer stream.
pub struct Fetch {
    pub stream: ChunkStream,
    /// Whether the server honored the requested resume offset. When false and
    /// an offset was requested, the stream restarts the resource from byte 0
    /// and the caller must truncate rather than append.
    pub resume_accepted: bool,
}

/// Capability contract implemented per scheme.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Preflight the resource: size and canonical filename when available.
    async fn probe(&self, url: &Url, settings: &Settings) -> Result<Probe, TransferError>;

    /// Open a byte stream starting at `offset`.
    async fn fetch(
        &self,
        url: &Url,
        settings: &Settings,
        offset: u64,
    ) -> Result<Fetch, TransferError>;
}

/// Select the protocol driver for a scheme.
pub fn for_scheme(scheme: Scheme) -> Box<dyn Transport> {
    match scheme {
        Scheme::Http | Scheme::Https => Box::new(HttpTransport),
        Scheme::Ftp => Box::new(FtpTransport),
    }
}
