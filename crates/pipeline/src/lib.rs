//! Drowsiness Monitoring Pipeline
//!
//! Drives one frame at a time through landmark detection, feature
//! extraction, optional head pose, and the driver state tracker, handing
//! state changes to the event logger.

mod detector;
mod monitor;
mod settings;
mod telemetry;

pub use detector::{LandmarkDetector, ReplayDetector};
pub use monitor::{DrowsinessMonitor, FrameObserver, FrameReport, LogPolicy, LoopControl, RunSummary};
pub use settings::{PerformanceConfig, Settings, SourceConfig, ENV_PREFIX};
pub use telemetry::init_logging;

use camera_capture::CameraError;
use dms::DmsError;
use event_log::LoggerError;
use thiserror::Error;

/// Pipeline error types
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Frame source error: {0}")]
    Camera(#[from] CameraError),

    #[error("Driver monitoring error: {0}")]
    Dms(#[from] DmsError),

    #[error("Event logger error: {0}")]
    Logger(#[from] LoggerError),

    #[error("Landmark detector error: {0}")]
    Detector(String),
}
