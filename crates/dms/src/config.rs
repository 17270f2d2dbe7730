//! DMS configuration

use crate::head_pose::PoseThresholds;
use crate::DmsError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// DMS configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmsConfig {
    /// Average EAR below this counts as eyes closed
    pub ear_threshold: f64,

    /// MAR above this counts as yawning
    pub mar_threshold: f64,

    /// Eyes must stay closed this long before the driver is drowsy (seconds)
    pub drowsy_time_seconds: f64,

    /// Head must stay turned away this long before the driver is distracted (seconds)
    pub distraction_time_seconds: f64,

    /// Enable head pose estimation and distraction tracking
    pub enable_head_pose: bool,

    /// Head direction thresholds (degrees)
    pub head_pose: PoseThresholds,
}

impl Default for DmsConfig {
    fn default() -> Self {
        Self {
            ear_threshold: 0.25,
            mar_threshold: 0.7,
            drowsy_time_seconds: 2.0,
            distraction_time_seconds: 2.0,
            enable_head_pose: false,
            head_pose: PoseThresholds::default(),
        }
    }
}

impl DmsConfig {
    /// Create strict config (lower thresholds)
    pub fn strict() -> Self {
        Self {
            drowsy_time_seconds: 1.0,
            distraction_time_seconds: 1.5,
            head_pose: PoseThresholds::symmetric(10.0, 10.0),
            ..Default::default()
        }
    }

    /// Create lenient config (higher thresholds)
    pub fn lenient() -> Self {
        Self {
            drowsy_time_seconds: 3.0,
            distraction_time_seconds: 4.0,
            head_pose: PoseThresholds::symmetric(30.0, 25.0),
            ..Default::default()
        }
    }

    pub fn drowsy_duration(&self) -> Duration {
        Duration::from_secs_f64(self.drowsy_time_seconds)
    }

    pub fn distraction_duration(&self) -> Duration {
        Duration::from_secs_f64(self.distraction_time_seconds)
    }

    /// Reject values the state tracker cannot work with
    pub fn validate(&self) -> Result<(), DmsError> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(DmsError::Config(format!("{} must be positive, got {}", name, value)))
            }
        };

        positive("ear_threshold", self.ear_threshold)?;
        positive("mar_threshold", self.mar_threshold)?;
        positive("drowsy_time_seconds", self.drowsy_time_seconds)?;
        positive("distraction_time_seconds", self.distraction_time_seconds)?;
        self.head_pose.validate()
    }
}
