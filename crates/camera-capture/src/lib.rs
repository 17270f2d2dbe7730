//! Camera Capture Library for the Drowsiness Monitor
//!
//! Provides the frame types shared by the monitoring pipeline:
//! - RGB video frames with crop/resize helpers and JPEG encoding
//! - The `FrameSource` abstraction over cameras and recorded footage
//! - An image-directory source for replaying recorded sessions

pub mod frame;
pub mod source;

pub use frame::VideoFrame;
pub use source::{FrameSource, ImageDirSource};

use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open video source: {0}")]
    Open(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Image encoding failed: {0}")]
    Encode(String),
}

/// Frame source configuration
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Directory holding recorded frames
    pub frames_dir: String,
    /// Accepted file extensions (lowercase)
    pub extensions: Vec<String>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            frames_dir: "frames/".to_string(),
            extensions: vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()],
        }
    }
}
