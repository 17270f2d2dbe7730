//! Frame loop orchestration

use crate::detector::LandmarkDetector;
use crate::settings::{PerformanceConfig, Settings};
use crate::PipelineError;
use camera_capture::{FrameSource, VideoFrame};
use dms::{
    largest_face, DmsConfig, DriverState, FaceDetection, FaceLandmarks, FaceRegion, FrameFeatures,
    HeadPose, HeadPoseEstimator, StateTracker,
};
use event_log::EventLogger;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Which frames produce a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogPolicy {
    /// Every change of reported state, including the return to alert
    #[default]
    Transitions,
    /// Every frame whose state is not alert
    EveryNonAlert,
}

/// Observer verdict after each processed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}

/// Result of processing one frame. All coordinates are source-frame pixels.
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    /// Index of the frame in the source, counting skipped frames
    pub frame_index: u64,
    pub state: DriverState,
    /// `None` when no usable face was found
    pub features: Option<FrameFeatures>,
    pub head_pose: Option<HeadPose>,
    pub face_region: Option<FaceRegion>,
    pub landmarks: Option<FaceLandmarks>,
    pub eyes_closed_secs: f64,
    pub distraction_secs: f64,
    /// A log entry was written for this frame
    pub logged: bool,
}

/// Receives every processed frame, e.g. to render an overlay
pub trait FrameObserver {
    fn on_frame(&mut self, frame: &VideoFrame, report: &FrameReport) -> LoopControl;
}

impl<F> FrameObserver for F
where
    F: FnMut(&VideoFrame, &FrameReport) -> LoopControl,
{
    fn on_frame(&mut self, frame: &VideoFrame, report: &FrameReport) -> LoopControl {
        self(frame, report)
    }
}

/// Counts for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunSummary {
    pub frames_read: u64,
    pub frames_processed: u64,
    pub events_logged: u64,
    /// Processed frames on which the detector reported an error
    pub detector_errors: u64,
}

/// Detection input and the transform back to source coordinates
struct DetectionView {
    frame: Option<VideoFrame>,
    scale: f64,
    dx: f64,
    dy: f64,
}

impl DetectionView {
    fn source() -> Self {
        Self {
            frame: None,
            scale: 1.0,
            dx: 0.0,
            dy: 0.0,
        }
    }

    fn to_source(&self, face: FaceDetection) -> FaceDetection {
        if self.frame.is_none() {
            return face;
        }
        FaceDetection {
            region: face.region.scale(self.scale).offset(self.dx, self.dy),
            landmarks: face
                .landmarks
                .map(|landmarks| landmarks.transform(self.scale, self.dx, self.dy)),
        }
    }
}

/// Single-threaded driver monitor: one frame fully processed before the next
pub struct DrowsinessMonitor<D> {
    detector: D,
    tracker: StateTracker,
    head_pose: Option<HeadPoseEstimator>,
    logger: Arc<EventLogger>,
    performance: PerformanceConfig,
    log_policy: LogPolicy,
    stop: Arc<AtomicBool>,
    last_reported: DriverState,
    last_region: Option<FaceRegion>,
    summary: RunSummary,
}

impl<D: LandmarkDetector> DrowsinessMonitor<D> {
    pub fn new(settings: &Settings, detector: D, logger: Arc<EventLogger>) -> Result<Self, PipelineError> {
        settings.validate()?;
        Ok(Self::with_parts(
            settings.dms.clone(),
            settings.performance.clone(),
            settings.log_policy,
            detector,
            logger,
        ))
    }

    fn with_parts(
        dms: DmsConfig,
        performance: PerformanceConfig,
        log_policy: LogPolicy,
        detector: D,
        logger: Arc<EventLogger>,
    ) -> Self {
        let head_pose = dms
            .enable_head_pose
            .then(|| HeadPoseEstimator::new(dms.head_pose));

        Self {
            detector,
            tracker: StateTracker::new(dms),
            head_pose,
            logger,
            performance,
            log_policy,
            stop: Arc::new(AtomicBool::new(false)),
            last_reported: DriverState::Alert,
            last_region: None,
            summary: RunSummary::default(),
        }
    }

    /// Flag that ends [`DrowsinessMonitor::run`] before the next frame
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    /// Pull frames until the source ends, the observer stops, or the stop flag is set
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        observer: &mut dyn FrameObserver,
    ) -> Result<RunSummary, PipelineError> {
        info!("Frame loop started");

        loop {
            if self.stop.load(Ordering::Acquire) {
                info!("Stop requested");
                break;
            }

            let Some(frame) = source.next_frame()? else {
                debug!("End of stream");
                break;
            };
            if frame.is_empty() {
                debug!("Empty frame, end of stream");
                break;
            }

            if let Some(report) = self.process_frame(&frame)? {
                if observer.on_frame(&frame, &report) == LoopControl::Stop {
                    info!("Observer requested stop");
                    break;
                }
            }
        }

        info!(
            "Frame loop finished. Read: {}, Processed: {}, Events: {}",
            self.summary.frames_read, self.summary.frames_processed, self.summary.events_logged
        );
        Ok(self.summary)
    }

    /// Process one frame at the current time; `None` for skipped frames
    pub fn process_frame(&mut self, frame: &VideoFrame) -> Result<Option<FrameReport>, PipelineError> {
        self.process_frame_at(frame, Instant::now())
    }

    pub fn process_frame_at(
        &mut self,
        frame: &VideoFrame,
        now: Instant,
    ) -> Result<Option<FrameReport>, PipelineError> {
        let frame_index = self.summary.frames_read;
        self.summary.frames_read += 1;
        if frame_index % u64::from(self.performance.frame_skip.max(1)) != 0 {
            return Ok(None);
        }
        self.summary.frames_processed += 1;
        counter!("pipeline_frames_processed").increment(1);

        let faces = self.detect(frame);
        let driver = largest_face(&faces)
            .and_then(|face| face.landmarks.as_ref().map(|landmarks| (face.region, landmarks)));

        let mut report = match driver {
            None => {
                self.tracker.reset_timers();
                self.last_region = None;
                FrameReport {
                    frame_index,
                    state: DriverState::NoFaceDetected,
                    features: None,
                    head_pose: None,
                    face_region: None,
                    landmarks: None,
                    eyes_closed_secs: 0.0,
                    distraction_secs: 0.0,
                    logged: false,
                }
            }
            Some((region, landmarks)) => {
                let features = FrameFeatures::from_landmarks(landmarks);
                let head_pose = match self.head_pose.as_mut() {
                    Some(estimator) => {
                        if !estimator.is_initialized() {
                            estimator.initialize(frame.width, frame.height)?;
                        }
                        Some(estimator.estimate(landmarks, frame.width, frame.height))
                    }
                    None => None,
                };

                let state =
                    self.tracker
                        .update_state_at(features.ear, features.mar, head_pose.as_ref(), now);
                self.last_region = Some(region);

                FrameReport {
                    frame_index,
                    state,
                    features: Some(features),
                    head_pose,
                    face_region: Some(region),
                    landmarks: Some(landmarks.clone()),
                    eyes_closed_secs: self.tracker.eyes_closed_duration_at(now),
                    distraction_secs: self.tracker.distraction_duration_at(now),
                    logged: false,
                }
            }
        };

        if self.should_log(report.state) {
            self.log_event(frame, &report);
            report.logged = true;
        }
        self.last_reported = report.state;

        Ok(Some(report))
    }

    fn should_log(&self, state: DriverState) -> bool {
        match self.log_policy {
            LogPolicy::Transitions => state != self.last_reported,
            LogPolicy::EveryNonAlert => state != DriverState::Alert,
        }
    }

    /// Always logs the source frame, whatever detection ran on
    fn log_event(&mut self, frame: &VideoFrame, report: &FrameReport) {
        let (ear, mar) = report
            .features
            .map(|features| (features.ear, features.mar))
            .unwrap_or((0.0, 0.0));
        let yaw = report
            .head_pose
            .filter(|pose| pose.is_valid)
            .map(|pose| pose.yaw);

        self.logger
            .log(report.state, report.state.message(), ear, mar, yaw, Some(frame));
        self.summary.events_logged += 1;
    }

    /// Detect faces and map them back to source-frame coordinates.
    /// A frame counts as one detector error however many attempts failed.
    fn detect(&mut self, frame: &VideoFrame) -> Vec<FaceDetection> {
        let mut failed = false;
        if self.performance.use_roi {
            if let Some(region) = self.last_region {
                if let Some(roi) = self.roi_view(frame, region) {
                    match self.detect_in(frame, &roi) {
                        Ok(faces) if faces.iter().any(|face| face.landmarks.is_some()) => {
                            return faces;
                        }
                        Ok(_) => debug!("No face in ROI, falling back to full frame"),
                        Err(e) => {
                            failed = true;
                            warn!("Landmark detection in ROI failed: {}", e);
                        }
                    }
                }
            }
        }

        let view = match self.downscale(frame) {
            Some((resized, scale)) => DetectionView {
                frame: Some(resized),
                scale,
                dx: 0.0,
                dy: 0.0,
            },
            None => DetectionView::source(),
        };
        let faces = match self.detect_in(frame, &view) {
            Ok(faces) => faces,
            Err(e) => {
                failed = true;
                warn!("Landmark detection failed: {}", e);
                Vec::new()
            }
        };
        if failed {
            self.summary.detector_errors += 1;
        }
        faces
    }

    fn detect_in(
        &mut self,
        source: &VideoFrame,
        view: &DetectionView,
    ) -> Result<Vec<FaceDetection>, PipelineError> {
        let input = view.frame.as_ref().unwrap_or(source);
        let faces = self.detector.detect(input)?;
        Ok(faces.into_iter().map(|face| view.to_source(face)).collect())
    }

    fn roi_view(&self, frame: &VideoFrame, region: FaceRegion) -> Option<DetectionView> {
        let roi = region
            .expand(1.0 + self.performance.roi_expand)
            .clamp_to(frame.width, frame.height);
        let x = roi.x.floor() as u32;
        let y = roi.y.floor() as u32;
        let width = roi.width.ceil() as u32;
        let height = roi.height.ceil() as u32;
        if width == 0 || height == 0 {
            return None;
        }

        let width = width.min(frame.width - x);
        let height = height.min(frame.height - y);
        let crop = frame.crop(x, y, width, height)?;
        let (input, scale) = match self.downscale(&crop) {
            Some((resized, scale)) => (resized, scale),
            None => (crop, 1.0),
        };
        Some(DetectionView {
            frame: Some(input),
            scale,
            dx: x as f64,
            dy: y as f64,
        })
    }

    /// Downscaled copy for detection and the factor back to `frame` pixels
    fn downscale(&self, frame: &VideoFrame) -> Option<(VideoFrame, f64)> {
        let width = self.performance.resize_width?;
        if width >= frame.width {
            return None;
        }
        let resized = frame.resize_to_width(width);
        let scale = frame.width as f64 / resized.width as f64;
        Some((resized, scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dms::Point;
    use std::time::Duration;

    /// Returns a fixed face, scripted per call
    struct ScriptedDetector {
        script: Vec<Vec<FaceDetection>>,
        calls: usize,
    }

    impl LandmarkDetector for ScriptedDetector {
        fn detect(&mut self, _frame: &VideoFrame) -> Result<Vec<FaceDetection>, PipelineError> {
            let faces = self.script.get(self.calls).cloned().unwrap_or_default();
            self.calls += 1;
            Ok(faces)
        }
    }

    fn face(eye_open: f64, mouth_open: f64, size: f64) -> FaceDetection {
        let mut points = vec![Point::new(50.0, 50.0); 68];
        for (offset, base) in [(36usize, 20.0), (42, 60.0)] {
            points[offset] = Point::new(base, 40.0);
            points[offset + 1] = Point::new(base + 5.0, 40.0 - eye_open);
            points[offset + 2] = Point::new(base + 10.0, 40.0 - eye_open);
            points[offset + 3] = Point::new(base + 15.0, 40.0);
            points[offset + 4] = Point::new(base + 10.0, 40.0 + eye_open);
            points[offset + 5] = Point::new(base + 5.0, 40.0 + eye_open);
        }
        // Inner lip: corner, upper lip left to right, corner, lower lip right to left
        for i in 0..8 {
            let step = if i <= 4 { i } else { 8 - i };
            let x = 30.0 + 5.0 * step as f64;
            let dy = if i == 0 || i == 4 { 0.0 } else { mouth_open };
            points[60 + i] = Point::new(x, if i < 4 { 75.0 - dy } else { 75.0 + dy });
        }
        FaceDetection {
            region: FaceRegion::new(0.0, 0.0, size, size),
            landmarks: Some(FaceLandmarks::new(points).unwrap()),
        }
    }

    fn monitor(
        script: Vec<Vec<FaceDetection>>,
        policy: LogPolicy,
        frame_skip: u32,
    ) -> DrowsinessMonitor<ScriptedDetector> {
        DrowsinessMonitor::with_parts(
            DmsConfig::default(),
            PerformanceConfig {
                frame_skip,
                ..Default::default()
            },
            policy,
            ScriptedDetector { script, calls: 0 },
            Arc::new(EventLogger::new()),
        )
    }

    #[test]
    fn test_sustained_closure_becomes_drowsy() {
        let script = vec![
            vec![face(3.0, 0.0, 100.0)],
            vec![face(3.0, 0.0, 100.0)],
            vec![face(0.5, 0.0, 100.0)],
            vec![face(0.5, 0.0, 100.0)],
            vec![face(0.5, 0.0, 100.0)],
        ];
        let mut monitor = monitor(script, LogPolicy::Transitions, 1);
        let frame = VideoFrame::filled(8, 8, [0, 0, 0]);
        let base = Instant::now();

        let states: Vec<_> = (0..5)
            .map(|i| {
                monitor
                    .process_frame_at(&frame, base + Duration::from_secs(i))
                    .unwrap()
                    .unwrap()
                    .state
            })
            .collect();
        assert_eq!(
            states,
            vec![
                DriverState::Alert,
                DriverState::Alert,
                DriverState::Alert,
                DriverState::Alert,
                DriverState::Drowsy,
            ]
        );
        assert_eq!(monitor.summary().events_logged, 1);
    }

    #[test]
    fn test_no_face_resets_timers() {
        let script = vec![
            vec![face(0.5, 0.0, 100.0)],
            vec![],
            vec![face(0.5, 0.0, 100.0)],
        ];
        let mut monitor = monitor(script, LogPolicy::Transitions, 1);
        let frame = VideoFrame::filled(8, 8, [0, 0, 0]);
        let base = Instant::now();

        monitor.process_frame_at(&frame, base).unwrap();
        assert!(monitor.tracker().eyes_closed_timer_active());

        let report = monitor
            .process_frame_at(&frame, base + Duration::from_secs(1))
            .unwrap()
            .unwrap();
        assert_eq!(report.state, DriverState::NoFaceDetected);
        assert!(report.features.is_none());
        assert!(report.logged);
        assert!(!monitor.tracker().eyes_closed_timer_active());

        // Restarted, so 3 s after the first closure is still not drowsy
        let report = monitor
            .process_frame_at(&frame, base + Duration::from_secs(3))
            .unwrap()
            .unwrap();
        assert_eq!(report.state, DriverState::Alert);
        assert!(report.logged);
    }

    #[test]
    fn test_largest_face_is_the_driver() {
        let script = vec![vec![face(3.0, 12.0, 40.0), face(0.5, 0.0, 100.0)]];
        let mut monitor = monitor(script, LogPolicy::Transitions, 1);
        let report = monitor
            .process_frame(&VideoFrame::filled(8, 8, [0, 0, 0]))
            .unwrap()
            .unwrap();
        assert_eq!(report.face_region.map(|r| r.width), Some(100.0));
        assert!(report.features.unwrap().ear < 0.25);
    }

    #[test]
    fn test_face_without_landmarks_is_no_face() {
        let mut largest = face(3.0, 0.0, 200.0);
        largest.landmarks = None;
        let script = vec![vec![largest, face(3.0, 0.0, 50.0)]];
        let mut monitor = monitor(script, LogPolicy::Transitions, 1);
        let report = monitor
            .process_frame(&VideoFrame::filled(8, 8, [0, 0, 0]))
            .unwrap()
            .unwrap();
        assert_eq!(report.state, DriverState::NoFaceDetected);
    }

    #[test]
    fn test_yawning_logged_every_frame_under_non_alert_policy() {
        let script = vec![vec![face(3.0, 12.0, 100.0)]; 4];
        let mut monitor = monitor(script, LogPolicy::EveryNonAlert, 1);
        let frame = VideoFrame::filled(8, 8, [0, 0, 0]);
        for _ in 0..4 {
            let report = monitor.process_frame(&frame).unwrap().unwrap();
            assert_eq!(report.state, DriverState::Yawning);
            assert!(report.logged);
        }
        assert_eq!(monitor.summary().events_logged, 4);
    }

    #[test]
    fn test_frame_skip() {
        let script = vec![vec![face(3.0, 0.0, 100.0)]; 10];
        let mut monitor = monitor(script, LogPolicy::Transitions, 3);
        let frame = VideoFrame::filled(8, 8, [0, 0, 0]);

        let processed: Vec<bool> = (0..7)
            .map(|_| monitor.process_frame(&frame).unwrap().is_some())
            .collect();
        assert_eq!(processed, vec![true, false, false, true, false, false, true]);
        assert_eq!(monitor.summary().frames_read, 7);
        assert_eq!(monitor.summary().frames_processed, 3);
        assert_eq!(monitor.detector.calls, 3);
    }

    /// Finds a face on the first call, fails on every later call
    struct FailingAfterFirst {
        calls: usize,
    }

    impl LandmarkDetector for FailingAfterFirst {
        fn detect(&mut self, _frame: &VideoFrame) -> Result<Vec<FaceDetection>, PipelineError> {
            self.calls += 1;
            if self.calls == 1 {
                Ok(vec![face(3.0, 0.0, 100.0)])
            } else {
                Err(PipelineError::Detector("model crashed".to_string()))
            }
        }
    }

    #[test]
    fn test_detector_error_counted_once_per_frame() {
        let mut monitor = DrowsinessMonitor::with_parts(
            DmsConfig::default(),
            PerformanceConfig {
                use_roi: true,
                ..Default::default()
            },
            LogPolicy::Transitions,
            FailingAfterFirst { calls: 0 },
            Arc::new(EventLogger::new()),
        );
        let frame = VideoFrame::filled(200, 200, [0, 0, 0]);

        let report = monitor.process_frame(&frame).unwrap().unwrap();
        assert_eq!(report.state, DriverState::Alert);

        // ROI attempt and full-frame fallback both fail
        let report = monitor.process_frame(&frame).unwrap().unwrap();
        assert_eq!(report.state, DriverState::NoFaceDetected);
        assert_eq!(monitor.detector.calls, 3);
        assert_eq!(monitor.summary().detector_errors, 1);

        // No previous face, so only the full frame is tried
        monitor.process_frame(&frame).unwrap();
        assert_eq!(monitor.detector.calls, 4);
        assert_eq!(monitor.summary().detector_errors, 2);
    }

    #[test]
    fn test_to_source_mapping() {
        let view = DetectionView {
            frame: Some(VideoFrame::filled(2, 2, [0, 0, 0])),
            scale: 2.0,
            dx: 10.0,
            dy: 5.0,
        };
        let mapped = view.to_source(face(3.0, 0.0, 20.0));
        assert_eq!(mapped.region, FaceRegion::new(10.0, 5.0, 40.0, 40.0));
        let landmarks = mapped.landmarks.unwrap();
        assert_eq!(landmarks.part(36), Some(Point::new(50.0, 85.0)));
    }
}
