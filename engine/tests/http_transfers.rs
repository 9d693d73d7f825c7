//! Integration tests for HTTP transfer semantics.
//!
//! These cover the wire-level contract with mock servers: completion,
//! filename negotiation, protocol failures, and the resume/resume-mismatch
//! edge cases around the Range header.

use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

use multiget::{DownloadEngine, History, Scheme, Settings, TaskEvent, TaskId, TaskStatus};

/// Deterministic test payload.
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn test_engine(download_dir: &Path) -> DownloadEngine {
    let settings = Settings {
        download_dir: download_dir.to_path_buf(),
        timeout_secs: 10,
        max_retries: 0,
        ..Settings::default()
    };
    DownloadEngine::new(settings, History::open_in_memory().unwrap())
}

async fn wait_terminal(
    events: &mut tokio::sync::broadcast::Receiver<TaskEvent>,
    id: TaskId,
) -> TaskStatus {
    loop {
        match tokio::time::timeout(Duration::from_secs(30), events.recv()).await {
            Ok(Ok(TaskEvent::Terminal { id: seen, status })) if seen == id => return status,
            Ok(Ok(_)) => continue,
            Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(err)) => panic!("event channel closed: {err}"),
            Err(_) => panic!("timed out waiting for terminal state"),
        }
    }
}

/// Matches requests that carry no Range header at all.
struct NoRangeHeader;

impl Match for NoRangeHeader {
    fn matches(&self, request: &Request) -> bool {
        !request.headers.contains_key("range")
    }
}

#[tokio::test]
async fn full_download_completes_with_exact_size_and_percent() {
    let body = payload(1000);
    let server = MockServer::start().await;
    Mock::given(path("/file.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let engine = test_engine(dir.path());
    let mut events = engine.subscribe();

    let id = engine
        .create(&format!("{}/file.bin", server.uri()), Scheme::Https)
        .unwrap();

    assert_eq!(wait_terminal(&mut events, id).await, TaskStatus::Completed);

    let snapshot = engine.snapshot(id).unwrap();
    assert_eq!(snapshot.total_size, Some(1000));
    assert_eq!(snapshot.bytes_transferred, 1000);
    assert_eq!(snapshot.progress_percent, Some(100.0));

    let on_disk = std::fs::read(dir.path().join("file.bin")).unwrap();
    assert_eq!(on_disk, body);
}

#[tokio::test]
async fn content_disposition_overrides_url_filename() {
    let server = MockServer::start().await;
    Mock::given(path("/api/fetch"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "content-disposition",
                    r#"attachment; filename="report-final.pdf""#,
                )
                .set_body_bytes(b"PDF bytes".to_vec()),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let engine = test_engine(dir.path());
    let mut events = engine.subscribe();

    let id = engine
        .create(&format!("{}/api/fetch", server.uri()), Scheme::Https)
        .unwrap();

    assert_eq!(wait_terminal(&mut events, id).await, TaskStatus::Completed);

    let snapshot = engine.snapshot(id).unwrap();
    assert_eq!(snapshot.filename, "report-final.pdf");
    assert!(dir.path().join("report-final.pdf").exists());
}

#[tokio::test]
async fn probe_404_errors_without_touching_the_filesystem() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/missing.bin"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let engine = test_engine(dir.path());
    let mut events = engine.subscribe();

    let id = engine
        .create(&format!("{}/missing.bin", server.uri()), Scheme::Https)
        .unwrap();

    match wait_terminal(&mut events, id).await {
        TaskStatus::Error(message) => assert!(message.contains("404"), "got: {message}"),
        other => panic!("expected error status, got {other:?}"),
    }
    assert!(!dir.path().join("missing.bin").exists());
}

#[tokio::test]
async fn get_403_after_successful_probe_surfaces_the_code() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/guarded.bin"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/guarded.bin"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let engine = test_engine(dir.path());
    let mut events = engine.subscribe();

    let id = engine
        .create(&format!("{}/guarded.bin", server.uri()), Scheme::Https)
        .unwrap();

    match wait_terminal(&mut events, id).await {
        TaskStatus::Error(message) => assert!(message.contains("403"), "got: {message}"),
        other => panic!("expected error status, got {other:?}"),
    }
}

#[tokio::test]
async fn fresh_download_sends_no_range_header() {
    let body = payload(500);
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/fresh.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fresh.bin"))
        .and(NoRangeHeader)
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let engine = test_engine(dir.path());
    let mut events = engine.subscribe();

    let id = engine
        .create(&format!("{}/fresh.bin", server.uri()), Scheme::Https)
        .unwrap();

    assert_eq!(wait_terminal(&mut events, id).await, TaskStatus::Completed);
    server.verify().await;
}

#[tokio::test]
async fn partial_file_resumes_at_offset_via_206() {
    let body = payload(1000);
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/data.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data.bin"))
        .and(header("range", "bytes=400-"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(body[400..].to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    // A previous attempt left the first 400 bytes behind
    std::fs::write(dir.path().join("data.bin"), &body[..400]).unwrap();

    let engine = test_engine(dir.path());
    let mut events = engine.subscribe();

    let id = engine
        .create(&format!("{}/data.bin", server.uri()), Scheme::Https)
        .unwrap();

    assert_eq!(wait_terminal(&mut events, id).await, TaskStatus::Completed);

    let snapshot = engine.snapshot(id).unwrap();
    assert_eq!(snapshot.bytes_transferred, 1000);

    // No duplication, no gap: the final file is exactly the full resource
    let on_disk = std::fs::read(dir.path().join("data.bin")).unwrap();
    assert_eq!(on_disk, body);
    server.verify().await;
}

#[tokio::test]
async fn ignored_range_restarts_the_file_from_zero() {
    let body = payload(1000);
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/careless.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;
    // This server ignores the Range header and always serves the full body
    Mock::given(method("GET"))
        .and(path("/careless.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    // Stale partial content that must NOT end up concatenated with the body
    std::fs::write(dir.path().join("careless.bin"), payload(400)).unwrap();

    let engine = test_engine(dir.path());
    let mut events = engine.subscribe();

    let id = engine
        .create(&format!("{}/careless.bin", server.uri()), Scheme::Https)
        .unwrap();

    assert_eq!(wait_terminal(&mut events, id).await, TaskStatus::Completed);

    let on_disk = std::fs::read(dir.path().join("careless.bin")).unwrap();
    assert_eq!(on_disk.len(), 1000, "appending after a 200 would corrupt");
    assert_eq!(on_disk, body);
}

#[tokio::test]
async fn completion_is_appended_to_history() {
    let body = payload(256);
    let server = MockServer::start().await;
    Mock::given(path("/keep.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let engine = test_engine(dir.path());
    let mut events = engine.subscribe();

    let id = engine
        .create(&format!("{}/keep.bin", server.uri()), Scheme::Https)
        .unwrap();
    assert_eq!(wait_terminal(&mut events, id).await, TaskStatus::Completed);

    let records = engine.history().all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].filename, "keep.bin");
    assert_eq!(records[0].total_size, Some(256));
    assert!(records[0].url.ends_with("/keep.bin"));
}

#[tokio::test]
async fn failed_transfers_never_reach_history() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/gone.bin"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let engine = test_engine(dir.path());
    let mut events = engine.subscribe();

    let id = engine
        .create(&format!("{}/gone.bin", server.uri()), Scheme::Https)
        .unwrap();
    assert!(matches!(
        wait_terminal(&mut events, id).await,
        TaskStatus::Error(_)
    ));

    assert!(engine.history().all().unwrap().is_empty());
}
