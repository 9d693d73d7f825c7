//! Transfer engine: task registry, workers, and control-plane operations.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{info, warn};
use url::Url;

use super::error::TransferError;
use super::task::{
    self, filename_from_url, DownloadTask, Scheme, TaskId, TaskSnapshot, TaskStatus,
    TransferOutcome,
};
use super::TaskEvent;
use crate::config::Settings;
use crate::history::{History, HistoryRecord};

/// Maximum number of buffered, not-yet-consumed events per subscriber.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Orchestrates concurrent transfers: creates tasks, runs one worker per
/// task, applies pause/cancel/retry commands, and notifies observers.
///
/// The engine owns the id→task registry; each worker exclusively owns its
/// task's progress fields and destination file for the attempt's duration.
/// A single task's failure never affects the engine or other tasks.
#[derive(Clone)]
pub struct DownloadEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    settings: RwLock<Settings>,
    tasks: RwLock<BTreeMap<TaskId, Arc<DownloadTask>>>,
    next_id: AtomicU64,
    events: broadcast::Sender<TaskEvent>,
    history: History,
}

impl DownloadEngine {
    /// Create an engine with the given global settings and history sink.
    pub fn new(settings: Settings, history: History) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(EngineInner {
                settings: RwLock::new(settings),
                tasks: RwLock::new(BTreeMap::new()),
                next_id: AtomicU64::new(0),
                events,
                history,
            }),
        }
    }

    /// Subscribe to task lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    /// Current global settings.
    pub fn settings(&self) -> Settings {
        self.inner.settings.read().clone()
    }

    /// Replace the global settings. Affects only transfers created afterwards;
    /// running tasks keep the snapshot they were created with.
    pub fn set_settings(&self, settings: Settings) {
        *self.inner.settings.write() = settings;
    }

    /// The history sink completions are recorded into.
    pub fn history(&self) -> &History {
        &self.inner.history
    }

    /// Start a new transfer and return its id without waiting for any I/O.
    ///
    /// URLs without a scheme prefix are completed with `default_scheme`. The
    /// destination is the configured download directory plus the URL-derived
    /// filename (later refined by the probe).
    pub fn create(&self, url: &str, default_scheme: Scheme) -> Result<TaskId, TransferError> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(TransferError::invalid_url(url));
        }

        let normalized = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("{}://{}", default_scheme.as_str(), trimmed)
        };

        let parsed =
            Url::parse(&normalized).map_err(|_| TransferError::invalid_url(&normalized))?;
        let scheme =
            Scheme::from_url(&parsed).ok_or_else(|| TransferError::invalid_url(&normalized))?;

        let settings = self.settings();
        let filename = filename_from_url(&parsed);
        let destination = settings.download_dir.join(&filename);

        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let task = Arc::new(DownloadTask::new(
            id,
            parsed,
            scheme,
            filename,
            destination,
            settings,
        ));

        info!(task = %id, url = %task.url(), scheme = %scheme, "transfer created");
        self.inner.tasks.write().insert(id, Arc::clone(&task));
        self.spawn_worker(task);

        Ok(id)
    }

    /// Request a pause at the next chunk boundary. No-op when the task does
    /// not exist or is not active.
    pub fn pause(&self, id: TaskId) -> bool {
        self.get(id).map(|task| task.request_pause()).unwrap_or(false)
    }

    /// Clear a pause request. No-op when the task does not exist or is not
    /// active. Buffered progress survives a pause/resume cycle untouched.
    pub fn resume(&self, id: TaskId) -> bool {
        self.get(id)
            .map(|task| task.request_resume())
            .unwrap_or(false)
    }

    /// Request cancellation at the next chunk boundary, keeping the partial
    /// file on disk. Idempotent; no-op for unknown or terminal tasks.
    pub fn cancel(&self, id: TaskId) -> bool {
        self.get(id)
            .map(|task| task.request_cancel())
            .unwrap_or(false)
    }

    /// Retry a failed transfer, resuming from the bytes already on disk.
    ///
    /// Rejected with an invalid-state error when the task is not in `Error`
    /// or its retry budget is exhausted.
    pub fn retry(&self, id: TaskId) -> Result<(), TransferError> {
        let task = self
            .get(id)
            .ok_or_else(|| TransferError::invalid_state(format!("unknown task {id}")))?;

        let attempt = task.prepare_retry()?;
        info!(task = %id, attempt, "retrying transfer");
        self.spawn_worker(task);
        Ok(())
    }

    /// Remove a finished task from the registry. Active tasks must be
    /// cancelled first.
    pub fn remove_if_terminal(&self, id: TaskId) -> Result<(), TransferError> {
        let mut tasks = self.inner.tasks.write();
        let task = tasks
            .get(&id)
            .ok_or_else(|| TransferError::invalid_state(format!("unknown task {id}")))?;

        if !task.status().is_terminal() {
            return Err(TransferError::invalid_state(
                "task is still active; cancel it first",
            ));
        }

        tasks.remove(&id);
        Ok(())
    }

    /// Sweep every completed, cancelled, or failed task out of the registry,
    /// returning how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut tasks = self.inner.tasks.write();
        let before = tasks.len();
        tasks.retain(|_, task| !task.status().is_terminal());
        before - tasks.len()
    }

    /// Snapshots of all registered tasks, in creation order.
    pub fn list(&self) -> Vec<TaskSnapshot> {
        self.inner
            .tasks
            .read()
            .values()
            .map(|task| task.snapshot())
            .collect()
    }

    /// Snapshot of one task, if it is still registered.
    pub fn snapshot(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.get(id).map(|task| task.snapshot())
    }

    fn get(&self, id: TaskId) -> Option<Arc<DownloadTask>> {
        self.inner.tasks.read().get(&id).cloned()
    }

    fn spawn_worker(&self, task: Arc<DownloadTask>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_worker(inner, task).await;
        });
    }
}

/// Drive one attempt to a terminal state and report it. All transport and
/// filesystem failures are mapped to the task's `Error` status here; nothing
/// propagates out of the worker.
async fn run_worker(inner: Arc<EngineInner>, task: Arc<DownloadTask>) {
    task.begin_attempt();

    let status = match task::run_transfer(&task, &inner.events).await {
        Ok(TransferOutcome::Completed) => {
            task.mark_completed();
            info!(
                task = %task.id(),
                bytes = task.bytes(),
                elapsed_secs = task.attempt_elapsed().as_secs_f64(),
                "transfer completed"
            );

            let record = HistoryRecord {
                filename: task.filename(),
                url: task.url().to_string(),
                scheme: task.scheme(),
                destination: task.destination(),
                completed_at: chrono::Utc::now(),
                total_size: task.total_size(),
            };
            if let Err(err) = inner.history.record(&record) {
                warn!(task = %task.id(), error = %err, "failed to write history record");
            }

            TaskStatus::Completed
        }
        Ok(TransferOutcome::Cancelled) => {
            info!(task = %task.id(), bytes = task.bytes(), "transfer cancelled");
            TaskStatus::Cancelled
        }
        Err(err) => {
            warn!(task = %task.id(), error = %err, "transfer failed");
            TaskStatus::Error(err.to_string())
        }
    };

    task.set_status(status.clone());
    let _ = inner.events.send(TaskEvent::Terminal {
        id: task.id(),
        status,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine() -> DownloadEngine {
        DownloadEngine::new(Settings::default(), History::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn create_rejects_empty_url() {
        let engine = test_engine();
        let result = engine.create("   ", Scheme::Https);
        assert!(matches!(result, Err(TransferError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn create_rejects_unsupported_scheme() {
        let engine = test_engine();
        let result = engine.create("file:///etc/passwd", Scheme::Https);
        assert!(matches!(result, Err(TransferError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn create_prefixes_bare_urls_with_the_default_scheme() {
        let engine = test_engine();
        let id = engine.create("example.com/file.bin", Scheme::Https).unwrap();
        let snapshot = engine.snapshot(id).unwrap();
        assert_eq!(snapshot.scheme, Scheme::Https);
        assert!(snapshot.url.starts_with("https://"));
        assert_eq!(snapshot.filename, "file.bin");
    }

    #[tokio::test]
    async fn list_is_ordered_by_creation() {
        let engine = test_engine();
        let first = engine.create("https://example.com/a.bin", Scheme::Https).unwrap();
        let second = engine.create("https://example.com/b.bin", Scheme::Https).unwrap();

        let ids: Vec<TaskId> = engine.list().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[tokio::test]
    async fn commands_on_unknown_tasks_are_noops() {
        let engine = test_engine();
        let bogus = TaskId(999);
        assert!(!engine.pause(bogus));
        assert!(!engine.resume(bogus));
        assert!(!engine.cancel(bogus));
        assert!(engine.retry(bogus).is_err());
        assert!(engine.remove_if_terminal(bogus).is_err());
    }

    #[tokio::test]
    async fn settings_changes_only_affect_new_tasks() {
        let engine = test_engine();
        let mut updated = engine.settings();
        updated.max_retries = 9;
        engine.set_settings(updated);
        assert_eq!(engine.settings().max_retries, 9);
    }
}
