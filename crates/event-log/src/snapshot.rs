//! JPEG snapshots of event frames

use crate::entry::COMPACT_TIMESTAMP;
use crate::LoggerError;
use camera_capture::VideoFrame;
use chrono::{DateTime, Local};
use dms::DriverState;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Writes frames into a snapshot directory, creating it on first use
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Encode `frame` as JPEG and return the written path
    pub fn save(
        &self,
        frame: &VideoFrame,
        state: DriverState,
        at: DateTime<Local>,
    ) -> Result<PathBuf, LoggerError> {
        if frame.is_empty() {
            return Err(LoggerError::Snapshot("empty frame".into()));
        }

        std::fs::create_dir_all(&self.dir).map_err(|e| LoggerError::io(&self.dir, e))?;

        let path = self.dir.join(snapshot_filename(state, at));
        frame
            .save_jpeg(&path)
            .map_err(|e| LoggerError::Snapshot(e.to_string()))?;

        debug!("Snapshot saved: {}", path.display());
        Ok(path)
    }
}

/// `<state>_<timestamp>_<8 hex>.jpg`; the suffix keeps same-millisecond events apart
pub(crate) fn snapshot_filename(state: DriverState, at: DateTime<Local>) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}.jpg",
        state.as_str().to_ascii_lowercase(),
        at.format(COMPACT_TIMESTAMP),
        &id[..8]
    )
}
