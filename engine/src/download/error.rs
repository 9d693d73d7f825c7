//! Error types for the transfer engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while creating or running a transfer.
///
/// Worker-side failures are caught by the worker and surface as the task's
/// `Error(message)` status; they never abort the engine or other tasks.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Connection-level or timeout failure.
    #[error("network error: {message}")]
    Network {
        /// Human-readable cause.
        message: String,
    },

    /// The server answered with a status/response the protocol driver does
    /// not accept.
    #[error("protocol error: unexpected status {code}")]
    Protocol {
        /// Numeric status code (HTTP status or FTP reply code).
        code: u16,
    },

    /// Filesystem failure while preparing or writing the destination.
    #[error("filesystem error at {path}: {source}")]
    FileSystem {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A command was issued that the task's current state does not allow.
    #[error("invalid state: {reason}")]
    InvalidState {
        /// Why the command was rejected.
        reason: String,
    },

    /// The server refused to continue a transfer at the requested offset.
    #[error("server did not honor resume offset {offset}")]
    ResumeMismatch {
        /// The byte offset the resume was attempted at.
        offset: u64,
    },

    /// The provided URL is empty, malformed, or uses an unsupported scheme.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The offending URL string.
        url: String,
    },
}

impl TransferError {
    /// Creates a network error from anything displayable.
    pub fn network(source: impl std::fmt::Display) -> Self {
        Self::Network {
            message: source.to_string(),
        }
    }

    /// Creates a protocol error for an unexpected status code.
    pub fn protocol(code: u16) -> Self {
        Self::Protocol { code }
    }

    /// Creates a filesystem error.
    pub fn file_system(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileSystem {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid-state error.
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// Creates an invalid-URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }
}
