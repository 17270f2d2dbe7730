//! Driver Event Log
//!
//! Keeps persistence and publishing off the frame loop:
//! - Immutable log entries queued in a bounded, drop-oldest buffer
//! - One background writer appending JSON Lines or plain text
//! - Synchronous JPEG snapshots for non-alert events
//! - Best-effort forwarding of each entry to the cloud publisher

mod config;
mod entry;
mod logger;
mod queue;
mod snapshot;
mod worker;

pub use config::{LogFormat, LoggerConfig};
pub use entry::{EventRecord, LogEntry};
pub use logger::{EventLogger, LoggerStats};
pub use queue::{EventQueue, DEFAULT_QUEUE_CAPACITY};
pub use snapshot::SnapshotStore;

use thiserror::Error;

/// Event log errors
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Snapshot failed: {0}")]
    Snapshot(String),

    #[error("Failed to start writer thread: {0}")]
    Worker(String),
}

impl LoggerError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        LoggerError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
