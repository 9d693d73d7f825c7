//! multiget: a multi-protocol file transfer engine.
//!
//! Given an HTTP, HTTPS, or FTP URL, the [`DownloadEngine`] fetches the
//! resource to local storage with resumable transfers (HTTP byte ranges,
//! FTP REST offsets), live pause/cancel, bounded retry, and real-time
//! progress reporting over a broadcast event channel.
//!
//! The engine renders nothing and decides nothing on its own: an external
//! controller invokes its operations and an external observer consumes its
//! snapshots and [`TaskEvent`]s.

pub mod config;
pub mod download;
pub mod history;

pub use config::{ProxySettings, Settings};
pub use download::{
    DownloadEngine, Scheme, TaskEvent, TaskId, TaskSnapshot, TaskStatus, TransferError,
};
pub use history::{History, HistoryRecord};
