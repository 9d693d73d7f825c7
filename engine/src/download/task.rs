//! Individual transfer task: entity, state machine, and worker loop.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;

use super::error::TransferError;
use super::progress::{percent, ProgressSampler};
use super::transport;
use super::TaskEvent;
use crate::config::Settings;

/// How often a paused or pausing worker rechecks its command flags. Bounds
/// pause/resume and cancel latency to roughly one interval plus one chunk.
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Opaque task identifier, unique for the process lifetime. Ids are handed
/// out monotonically, so id order is creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// URL scheme of a transfer, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
    Ftp,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Ftp => "ftp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "ftp" => Some(Self::Ftp),
            _ => None,
        }
    }

    pub fn from_url(url: &Url) -> Option<Self> {
        Self::parse(url.scheme())
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a transfer task.
///
/// `Completed` and `Cancelled` are terminal; `Error` is terminal unless the
/// task is explicitly retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Starting,
    Downloading,
    Paused,
    Retrying,
    Completed,
    Cancelled,
    Error(String),
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Error(_))
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => f.write_str("starting"),
            Self::Downloading => f.write_str("downloading"),
            Self::Paused => f.write_str("paused"),
            Self::Retrying => f.write_str("retrying"),
            Self::Completed => f.write_str("completed"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// Worker-written speed/percent pair. The control plane only reads it, so a
/// stale read across the two fields is tolerable; individual fields are never
/// partially written.
#[derive(Debug, Default, Clone, Copy)]
struct Gauge {
    percent: f64,
    speed: f64,
}

/// One in-flight or finished transfer.
///
/// The worker exclusively writes the progress fields for the duration of an
/// attempt; the engine mutates only the command flags and reads the rest.
pub struct DownloadTask {
    id: TaskId,
    url: Url,
    scheme: Scheme,
    settings: Settings,
    filename: RwLock<String>,
    destination: RwLock<PathBuf>,
    total_size: RwLock<Option<u64>>,
    bytes_transferred: AtomicU64,
    gauge: RwLock<Gauge>,
    status: RwLock<TaskStatus>,
    pause_requested: AtomicBool,
    cancel_requested: AtomicBool,
    retry_count: AtomicU32,
    attempt_started_at: RwLock<Instant>,
}

impl DownloadTask {
    pub(crate) fn new(
        id: TaskId,
        url: Url,
        scheme: Scheme,
        filename: String,
        destination: PathBuf,
        settings: Settings,
    ) -> Self {
        Self {
            id,
            url,
            scheme,
            settings,
            filename: RwLock::new(filename),
            destination: RwLock::new(destination),
            total_size: RwLock::new(None),
            bytes_transferred: AtomicU64::new(0),
            gauge: RwLock::new(Gauge::default()),
            status: RwLock::new(TaskStatus::Starting),
            pause_requested: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            retry_count: AtomicU32::new(0),
            attempt_started_at: RwLock::new(Instant::now()),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn url(&self) -> &Url {
        &self.url
    }

    pub(crate) fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn status(&self) -> TaskStatus {
        self.status.read().clone()
    }

    pub(crate) fn set_status(&self, status: TaskStatus) {
        *self.status.write() = status;
    }

    pub(crate) fn filename(&self) -> String {
        self.filename.read().clone()
    }

    pub(crate) fn destination(&self) -> PathBuf {
        self.destination.read().clone()
    }

    pub(crate) fn total_size(&self) -> Option<u64> {
        *self.total_size.read()
    }

    pub(crate) fn bytes(&self) -> u64 {
        self.bytes_transferred.load(Ordering::SeqCst)
    }

    fn set_bytes(&self, bytes: u64) {
        self.bytes_transferred.store(bytes, Ordering::SeqCst);
    }

    fn add_bytes(&self, delta: u64) -> u64 {
        self.bytes_transferred.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub(crate) fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    pub(crate) fn pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Ask the worker to pause at the next chunk boundary. No-op on tasks
    /// that are not active.
    pub(crate) fn request_pause(&self) -> bool {
        if !self.status().is_active() {
            return false;
        }
        self.pause_requested.store(true, Ordering::SeqCst);
        true
    }

    /// Clear a pause request so a paused worker resumes. No-op on tasks that
    /// are not active.
    pub(crate) fn request_resume(&self) -> bool {
        if !self.status().is_active() {
            return false;
        }
        self.pause_requested.store(false, Ordering::SeqCst);
        true
    }

    /// Ask the worker to stop at the next chunk boundary, keeping the partial
    /// file. Idempotent; no-op once the task is terminal.
    pub(crate) fn request_cancel(&self) -> bool {
        if self.status().is_terminal() {
            return false;
        }
        self.cancel_requested.store(true, Ordering::SeqCst);
        true
    }

    /// Validate and apply an explicit retry command: only a failed task below
    /// its retry ceiling may be retried. Command flags are reset and the new
    /// attempt reuses whatever bytes are already on disk.
    pub(crate) fn prepare_retry(&self) -> Result<u32, TransferError> {
        let mut status = self.status.write();
        if !matches!(*status, TaskStatus::Error(_)) {
            return Err(TransferError::invalid_state(format!(
                "retry requires a failed task, current state is {}",
                *status
            )));
        }

        let attempts = self.retry_count.load(Ordering::SeqCst);
        if attempts >= self.settings.max_retries {
            return Err(TransferError::invalid_state(format!(
                "retry limit of {} reached",
                self.settings.max_retries
            )));
        }

        self.retry_count.store(attempts + 1, Ordering::SeqCst);
        self.pause_requested.store(false, Ordering::SeqCst);
        self.cancel_requested.store(false, Ordering::SeqCst);
        *status = TaskStatus::Retrying;
        Ok(attempts + 1)
    }

    /// Mark the start of a fresh attempt.
    pub(crate) fn begin_attempt(&self) {
        *self.attempt_started_at.write() = Instant::now();
        self.set_status(TaskStatus::Starting);
    }

    pub(crate) fn attempt_elapsed(&self) -> Duration {
        self.attempt_started_at.read().elapsed()
    }

    /// Fold probe results into the task: the size is set once, and a
    /// server-suggested filename replaces the URL-derived one.
    fn apply_probe(&self, probe: &transport::Probe) {
        if let Some(size) = probe.total_size {
            let mut total = self.total_size.write();
            if total.is_none() {
                *total = Some(size);
            }
        }
        if let Some(name) = &probe.filename {
            let mut filename = self.filename.write();
            if *filename != *name {
                let mut destination = self.destination.write();
                *destination = destination.with_file_name(name);
                *filename = name.clone();
            }
        }
    }

    fn update_gauge(&self, speed: f64, percent: Option<f64>) {
        let mut gauge = self.gauge.write();
        gauge.speed = speed;
        if let Some(value) = percent {
            gauge.percent = value;
        }
    }

    pub(crate) fn mark_completed(&self) {
        let mut gauge = self.gauge.write();
        gauge.percent = 100.0;
        gauge.speed = 0.0;
    }

    /// Read-only copy of the task's current fields for external observers.
    pub(crate) fn snapshot(&self) -> TaskSnapshot {
        let gauge = *self.gauge.read();
        let total_size = self.total_size();
        TaskSnapshot {
            id: self.id,
            url: self.url.to_string(),
            scheme: self.scheme,
            filename: self.filename(),
            destination: self.destination(),
            total_size,
            bytes_transferred: self.bytes(),
            progress_percent: total_size.map(|_| gauge.percent),
            speed_bytes_per_sec: gauge.speed,
            status: self.status(),
            retry_count: self.retry_count(),
        }
    }
}

/// Point-in-time view of a task, as shown to external observers. Fields may
/// have advanced again by the time the observer acts on it.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub url: String,
    pub scheme: Scheme,
    pub filename: String,
    pub destination: PathBuf,
    pub total_size: Option<u64>,
    pub bytes_transferred: u64,
    /// Defined only once the total size is known.
    pub progress_percent: Option<f64>,
    pub speed_bytes_per_sec: f64,
    pub status: TaskStatus,
    pub retry_count: u32,
}

/// How an attempt finished without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferOutcome {
    Completed,
    Cancelled,
}

/// Derive a filename from the URL's last path segment, or generate a
/// placeholder when the URL has none.
pub(crate) fn filename_from_url(url: &Url) -> String {
    if let Some(segments) = url.path_segments() {
        if let Some(last) = segments.last() {
            if !last.is_empty() {
                return urlencoding::decode(last)
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| last.to_string());
            }
        }
    }
    format!("download_{}", uuid::Uuid::new_v4())
}

/// Run one transfer attempt to its end: probe, open the destination
/// (appending when the server honors the resume offset), then stream chunks,
/// honoring pause and cancel requests at chunk boundaries.
pub(crate) async fn run_transfer(
    task: &DownloadTask,
    events: &broadcast::Sender<TaskEvent>,
) -> Result<TransferOutcome, TransferError> {
    let settings = task.settings();
    let driver = transport::for_scheme(task.scheme());

    let probe = driver.probe(task.url(), settings).await?;
    task.apply_probe(&probe);

    let destination = task.destination();
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TransferError::file_system(parent, e))?;
    }

    // Bytes already on disk from an earlier attempt become the resume offset.
    let offset = match tokio::fs::metadata(&destination).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };

    let fetch = driver.fetch(task.url(), settings, offset).await?;

    let resuming = offset > 0 && fetch.resume_accepted;
    if offset > 0 && !fetch.resume_accepted {
        // The server restarted the full body; appending would corrupt the
        // file, so truncate and take the stream from byte 0.
        warn!(
            task = %task.id(),
            offset,
            "server ignored resume offset, restarting from zero"
        );
    }

    let mut file = if resuming {
        OpenOptions::new()
            .append(true)
            .open(&destination)
            .await
            .map_err(|e| TransferError::file_system(&destination, e))?
    } else {
        File::create(&destination)
            .await
            .map_err(|e| TransferError::file_system(&destination, e))?
    };

    let start = if resuming { offset } else { 0 };
    task.set_bytes(start);
    debug!(task = %task.id(), start, "streaming transfer");

    let mut sampler = ProgressSampler::new(start, Instant::now());
    let mut first_chunk = true;
    let mut cancelled = false;
    let mut stream = fetch.stream;

    'chunks: while let Some(next) = stream.next().await {
        let chunk = next?;

        if task.cancel_requested() {
            cancelled = true;
            break 'chunks;
        }

        if task.pause_requested() {
            task.set_status(TaskStatus::Paused);
            let _ = events.send(TaskEvent::Progress { id: task.id() });
            loop {
                if task.cancel_requested() {
                    cancelled = true;
                    break 'chunks;
                }
                if !task.pause_requested() {
                    break;
                }
                tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
            }
            task.set_status(TaskStatus::Downloading);
            // Paused wall time must not drag the next speed figure down
            sampler.reset(task.bytes(), Instant::now());
            let _ = events.send(TaskEvent::Progress { id: task.id() });
        }

        if first_chunk {
            task.set_status(TaskStatus::Downloading);
            first_chunk = false;
        }

        file.write_all(&chunk)
            .await
            .map_err(|e| TransferError::file_system(&destination, e))?;
        let bytes_now = task.add_bytes(chunk.len() as u64);

        if let Some(speed) = sampler.sample(bytes_now, Instant::now()) {
            let pct = task.total_size().map(|total| percent(bytes_now, total));
            task.update_gauge(speed, pct);
            let _ = events.send(TaskEvent::Progress { id: task.id() });
        }
    }

    // Single flush point so an aborted attempt still lands every byte the
    // counter claims was written
    file.flush()
        .await
        .map_err(|e| TransferError::file_system(&destination, e))?;

    if cancelled || task.cancel_requested() {
        return Ok(TransferOutcome::Cancelled);
    }

    if let Some(total) = task.total_size() {
        let received = task.bytes();
        if received < total {
            return Err(TransferError::network(format!(
                "transfer ended early: {received} of {total} bytes received"
            )));
        }
    }

    Ok(TransferOutcome::Completed)
}
