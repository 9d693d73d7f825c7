//! The transfer engine: tasks, protocol transports, progress, and the
//! orchestrating [`DownloadEngine`].

mod engine;
mod error;
pub mod progress;
mod task;
pub mod transport;

pub use engine::DownloadEngine;
pub use error::TransferError;
pub use task::{Scheme, TaskId, TaskSnapshot, TaskStatus};

/// Notification pushed at external observers.
///
/// Events carry only the task id; observers re-read the current snapshot,
/// which may already have advanced by the time they run. Per task, events
/// are delivered in the order the worker produced them.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// A progress sample was taken or the pause state flipped.
    Progress { id: TaskId },
    /// The task reached `Completed`, `Cancelled`, or `Error`.
    Terminal { id: TaskId, status: TaskStatus },
}
