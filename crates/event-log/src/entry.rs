//! Log entries and their on-disk representations

use chrono::{DateTime, Local};
use dms::DriverState;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Timestamp layout shared by JSON records and snapshot file names
pub(crate) const COMPACT_TIMESTAMP: &str = "%b%d_%Y_%Hh%Mm%Ss_%3f";

const TEXT_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

/// One driver event. Built on the frame loop, never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    timestamp: DateTime<Local>,
    state: DriverState,
    message: String,
    ear: f64,
    mar: f64,
    yaw: Option<f64>,
    image: Option<PathBuf>,
}

impl LogEntry {
    pub fn new(
        timestamp: DateTime<Local>,
        state: DriverState,
        message: impl Into<String>,
        ear: f64,
        mar: f64,
        yaw: Option<f64>,
        image: Option<PathBuf>,
    ) -> Self {
        Self {
            timestamp,
            state,
            message: message.into(),
            ear,
            mar,
            yaw,
            image,
        }
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn ear(&self) -> f64 {
        self.ear
    }

    pub fn mar(&self) -> f64 {
        self.mar
    }

    pub fn yaw(&self) -> Option<f64> {
        self.yaw
    }

    /// Snapshot written for this event, if any
    pub fn image(&self) -> Option<&Path> {
        self.image.as_deref()
    }

    pub fn to_record(&self) -> EventRecord {
        EventRecord {
            timestamp: self.timestamp.format(COMPACT_TIMESTAMP).to_string(),
            state: self.state,
            ear: self.ear,
            mar: self.mar,
            yaw: self.yaw,
            message: self.message.clone(),
            image: self.image.as_ref().map(|p| p.display().to_string()),
        }
    }

    /// Single-line JSON object, the format published and written to JSONL files
    pub fn to_json_line(&self) -> String {
        // EventRecord has only plain fields, serialization cannot fail
        serde_json::to_string(&self.to_record()).unwrap_or_default()
    }

    /// `YYYY-mm-dd HH:MM:SS | State: S | EAR: e | MAR: m [| Yaw: y] | Message: msg [| Image: path]`
    pub fn to_text_line(&self) -> String {
        let mut line = format!(
            "{} | State: {} | EAR: {:.3} | MAR: {:.3}",
            self.timestamp.format(TEXT_TIMESTAMP),
            self.state,
            self.ear,
            self.mar
        );
        if let Some(yaw) = self.yaw {
            let _ = write!(line, " | Yaw: {:.1}", yaw);
        }
        let _ = write!(line, " | Message: {}", self.message);
        if let Some(image) = &self.image {
            let _ = write!(line, " | Image: {}", image.display());
        }
        line
    }
}

/// Serialized form of a [`LogEntry`], one per JSON line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: String,
    pub state: DriverState,
    pub ear: f64,
    pub mar: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yaw: Option<f64>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}
