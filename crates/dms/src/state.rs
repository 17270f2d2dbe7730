//! Driver state tracking
//!
//! Turns noisy per-frame features into a debounced driver state. Eye closure
//! and head turns must persist for a configured duration before they count;
//! yawning is instantaneous.

use crate::config::DmsConfig;
use crate::head_pose::HeadPose;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Driver state, one per processed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverState {
    #[default]
    Alert,
    Drowsy,
    Yawning,
    DrowsyYawning,
    Distracted,
    DrowsyDistracted,
    #[serde(rename = "NO_FACE")]
    NoFaceDetected,
}

impl DriverState {
    /// Wire name used in logs and published events
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverState::Alert => "ALERT",
            DriverState::Drowsy => "DROWSY",
            DriverState::Yawning => "YAWNING",
            DriverState::DrowsyYawning => "DROWSY_YAWNING",
            DriverState::Distracted => "DISTRACTED",
            DriverState::DrowsyDistracted => "DROWSY_DISTRACTED",
            DriverState::NoFaceDetected => "NO_FACE",
        }
    }

    /// Human readable event message
    pub fn message(&self) -> &'static str {
        match self {
            DriverState::Alert => "Driver is alert",
            DriverState::Drowsy => "Driver showing signs of drowsiness",
            DriverState::Yawning => "Driver is yawning",
            DriverState::DrowsyYawning => "Driver is drowsy and yawning - HIGH RISK",
            DriverState::Distracted => "Driver is looking away from the road",
            DriverState::DrowsyDistracted => "Driver is drowsy and distracted - CRITICAL RISK",
            DriverState::NoFaceDetected => "No face detected",
        }
    }

    /// Severity rank, higher is worse. NoFace sits between alert and yawning.
    pub fn severity(&self) -> u8 {
        match self {
            DriverState::Alert => 0,
            DriverState::NoFaceDetected => 1,
            DriverState::Yawning => 2,
            DriverState::Distracted => 3,
            DriverState::Drowsy => 4,
            DriverState::DrowsyYawning => 5,
            DriverState::DrowsyDistracted => 6,
        }
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw conditions behind the last resolved state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateFlags {
    pub drowsy: bool,
    pub yawning: bool,
    pub distracted: bool,
}

impl StateFlags {
    /// Fixed severity order:
    /// drowsy+distracted > drowsy+yawning > drowsy > distracted > yawning > alert
    pub fn resolve(&self) -> DriverState {
        match (self.drowsy, self.yawning, self.distracted) {
            (true, _, true) => DriverState::DrowsyDistracted,
            (true, true, false) => DriverState::DrowsyYawning,
            (true, false, false) => DriverState::Drowsy,
            (false, _, true) => DriverState::Distracted,
            (false, true, false) => DriverState::Yawning,
            (false, false, false) => DriverState::Alert,
        }
    }
}

/// A condition that must hold continuously before it counts
#[derive(Debug, Clone, Copy, Default)]
struct DebounceTimer {
    since: Option<Instant>,
}

impl DebounceTimer {
    /// Feed one observation. The first active frame only starts the timer.
    fn observe(&mut self, active: bool, now: Instant, threshold: Duration) -> bool {
        if !active {
            self.since = None;
            return false;
        }
        match self.since {
            None => {
                self.since = Some(now);
                false
            }
            Some(start) => now.saturating_duration_since(start) >= threshold,
        }
    }

    fn is_active(&self) -> bool {
        self.since.is_some()
    }

    fn elapsed_at(&self, now: Instant) -> Duration {
        self.since
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }

    fn reset(&mut self) {
        self.since = None;
    }
}

/// Per-run driver state machine
#[derive(Debug, Clone)]
pub struct StateTracker {
    config: DmsConfig,
    eyes_closed: DebounceTimer,
    distraction: DebounceTimer,
    last_state: DriverState,
    last_flags: StateFlags,
}

impl StateTracker {
    pub fn new(config: DmsConfig) -> Self {
        Self {
            config,
            eyes_closed: DebounceTimer::default(),
            distraction: DebounceTimer::default(),
            last_state: DriverState::Alert,
            last_flags: StateFlags::default(),
        }
    }

    pub fn config(&self) -> &DmsConfig {
        &self.config
    }

    /// Classify one frame at the current time
    pub fn update_state(&mut self, ear: f64, mar: f64, head_pose: Option<&HeadPose>) -> DriverState {
        self.update_state_at(ear, mar, head_pose, Instant::now())
    }

    /// Classify one frame observed at `now`.
    ///
    /// `head_pose` is `None` when head pose estimation is disabled, in which
    /// case distraction is never reported.
    pub fn update_state_at(
        &mut self,
        ear: f64,
        mar: f64,
        head_pose: Option<&HeadPose>,
        now: Instant,
    ) -> DriverState {
        let flags = StateFlags {
            drowsy: self.check_drowsiness(ear, now),
            yawning: self.check_yawning(mar),
            distracted: self.check_distraction(head_pose, now),
        };

        let state = flags.resolve();
        if state != self.last_state {
            debug!(
                "Driver state {} -> {} (ear={:.3}, mar={:.3})",
                self.last_state, state, ear, mar
            );
        }
        self.last_state = state;
        self.last_flags = flags;
        state
    }

    fn check_drowsiness(&mut self, ear: f64, now: Instant) -> bool {
        // An unusable measurement says nothing about the eyes: keep the timer as is
        if !ear.is_finite() {
            return false;
        }
        self.eyes_closed.observe(
            ear < self.config.ear_threshold,
            now,
            self.config.drowsy_duration(),
        )
    }

    fn check_yawning(&self, mar: f64) -> bool {
        mar.is_finite() && mar > self.config.mar_threshold
    }

    fn check_distraction(&mut self, head_pose: Option<&HeadPose>, now: Instant) -> bool {
        match head_pose {
            Some(pose) if self.config.enable_head_pose && pose.is_valid => self.distraction.observe(
                !pose.is_forward(),
                now,
                self.config.distraction_duration(),
            ),
            _ => {
                self.distraction.reset();
                false
            }
        }
    }

    /// Forget partial closures and head turns (used on no-face frames)
    pub fn reset_timers(&mut self) {
        self.eyes_closed.reset();
        self.distraction.reset();
    }

    pub fn last_state(&self) -> DriverState {
        self.last_state
    }

    pub fn last_flags(&self) -> StateFlags {
        self.last_flags
    }

    pub fn eyes_closed_timer_active(&self) -> bool {
        self.eyes_closed.is_active()
    }

    pub fn distraction_timer_active(&self) -> bool {
        self.distraction.is_active()
    }

    /// Seconds the eyes have been continuously closed, 0.0 when open
    pub fn eyes_closed_duration(&self) -> f64 {
        self.eyes_closed_duration_at(Instant::now())
    }

    pub fn eyes_closed_duration_at(&self, now: Instant) -> f64 {
        self.eyes_closed.elapsed_at(now).as_secs_f64()
    }

    /// Seconds the head has been continuously turned away, 0.0 when forward
    pub fn distraction_duration(&self) -> f64 {
        self.distraction_duration_at(Instant::now())
    }

    pub fn distraction_duration_at(&self, now: Instant) -> f64 {
        self.distraction.elapsed_at(now).as_secs_f64()
    }
}
