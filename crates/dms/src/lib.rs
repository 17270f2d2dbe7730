//! Driver Monitoring System (DMS)
//!
//! Driver alertness estimation from facial geometry:
//! - 68-point landmark model and face selection
//! - Eye and mouth aspect ratios (EAR / MAR)
//! - Head pose estimation and looking direction
//! - Debounced driver state tracking (drowsiness, yawning, distraction)

pub mod config;
pub mod features;
pub mod head_pose;
pub mod landmarks;
pub mod state;

pub use config::DmsConfig;
pub use features::{calculate_ear, calculate_mar, FrameFeatures};
pub use head_pose::{HeadDirection, HeadPose, HeadPoseEstimator, PoseThresholds};
pub use landmarks::{largest_face, FaceDetection, FaceLandmarks, FaceRegion, Point};
pub use state::{DriverState, StateFlags, StateTracker};

use thiserror::Error;

/// DMS error types
#[derive(Error, Debug)]
pub enum DmsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Expected {expected} landmarks, got {actual}")]
    LandmarkCount { expected: usize, actual: usize },
}
