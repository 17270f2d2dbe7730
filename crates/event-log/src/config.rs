//! Event log configuration

use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::LoggerError;
use cloud_sync::PublisherConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// On-disk line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    JsonLines,
    /// Pipe-delimited text
    PlainText,
}

/// Event logger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Echo every event through `tracing` on the calling thread
    pub enable_console_logging: bool,
    /// Append events to `log_path/log_filename`
    pub enable_file_logging: bool,
    pub log_format: LogFormat,
    /// Write a JPEG of the triggering frame for non-alert events
    pub save_snapshots: bool,
    /// Forward events to the cloud publisher
    pub enable_publishing: bool,
    pub snapshot_path: PathBuf,
    pub log_path: PathBuf,
    pub log_filename: String,
    /// Pending entries kept before the oldest are dropped
    pub queue_capacity: usize,
    /// Writer wake-up interval
    pub worker_interval_ms: u64,
    /// Upper bound on waiting for the writer at shutdown
    pub shutdown_timeout_ms: u64,
    pub publisher: PublisherConfig,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            enable_console_logging: false,
            enable_file_logging: true,
            log_format: LogFormat::JsonLines,
            save_snapshots: true,
            enable_publishing: false,
            snapshot_path: PathBuf::from("snapshots/"),
            log_path: PathBuf::from("logs/"),
            log_filename: "drowsiness_log.jsonl".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            worker_interval_ms: 100,
            shutdown_timeout_ms: 5000,
            publisher: PublisherConfig::default(),
        }
    }
}

impl LoggerConfig {
    pub fn log_file(&self) -> PathBuf {
        self.log_path.join(&self.log_filename)
    }

    pub fn worker_interval(&self) -> Duration {
        Duration::from_millis(self.worker_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// A writer thread is only needed when something consumes the queue
    pub fn needs_worker(&self) -> bool {
        self.enable_file_logging || self.enable_publishing
    }

    pub fn validate(&self) -> Result<(), LoggerError> {
        if self.queue_capacity == 0 {
            return Err(LoggerError::Config("queue_capacity must be at least 1".into()));
        }
        if self.worker_interval_ms == 0 {
            return Err(LoggerError::Config("worker_interval_ms must be positive".into()));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(LoggerError::Config("shutdown_timeout_ms must be positive".into()));
        }
        if self.enable_file_logging && self.log_filename.trim().is_empty() {
            return Err(LoggerError::Config("log_filename must not be empty".into()));
        }
        Ok(())
    }
}
