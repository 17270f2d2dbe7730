//! Head pose estimation from facial landmarks
//!
//! Six landmarks are matched against a generic anthropometric 3D face model and
//! solved for rotation and translation under a pinhole camera (focal length =
//! image width, principal point = image centre, no lens distortion). The
//! rotation is reported as pitch/yaw/roll in degrees and classified into a
//! coarse looking direction.

use crate::landmarks::{FaceLandmarks, Point};
use crate::DmsError;
use nalgebra::{Matrix3, Rotation3, SMatrix, SVector, Vector3, Vector6};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Face model in millimetres, nose tip at the origin, camera axes
/// (x right, y down, z away from the camera) for a face looking into the lens.
/// Order matches `FaceLandmarks::pose_points`.
const MODEL_POINTS: [[f64; 3]; 6] = [
    [0.0, 0.0, 0.0],        // nose tip
    [0.0, 330.0, 65.0],     // chin
    [-225.0, -170.0, 135.0], // left eye outer corner
    [225.0, -170.0, 135.0], // right eye outer corner
    [-150.0, 150.0, 125.0], // left mouth corner
    [150.0, 150.0, 125.0],  // right mouth corner
];

/// Model distance between the two outer eye corners
const MODEL_EYE_SPAN: f64 = 450.0;

const MAX_ITERATIONS: usize = 100;

type Residuals = SVector<f64, 12>;
type Jacobian = SMatrix<f64, 12, 6>;

/// Coarse looking direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HeadDirection {
    Forward,
    LookingLeft,
    LookingRight,
    LookingUp,
    LookingDown,
    #[default]
    Unknown,
}

impl HeadDirection {
    pub fn label(&self) -> &'static str {
        match self {
            HeadDirection::Forward => "Forward",
            HeadDirection::LookingLeft => "Looking Left",
            HeadDirection::LookingRight => "Looking Right",
            HeadDirection::LookingUp => "Looking Up",
            HeadDirection::LookingDown => "Looking Down",
            HeadDirection::Unknown => "Unknown",
        }
    }
}

/// Head pose (Euler angles, degrees).
///
/// Positive pitch is chin up, negative yaw is the driver turning to their left.
/// The default value is invalid; check `is_valid` before reading angles.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeadPose {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
    pub direction: HeadDirection,
    pub is_valid: bool,
}

impl HeadPose {
    pub fn invalid() -> Self {
        Self::default()
    }

    /// Valid and facing the road
    pub fn is_forward(&self) -> bool {
        self.is_valid && self.direction == HeadDirection::Forward
    }
}

/// Direction classification thresholds (degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseThresholds {
    pub yaw_left: f64,
    pub yaw_right: f64,
    pub pitch_up: f64,
    pub pitch_down: f64,
}

impl Default for PoseThresholds {
    fn default() -> Self {
        Self::symmetric(15.0, 15.0)
    }
}

impl PoseThresholds {
    pub fn symmetric(yaw: f64, pitch: f64) -> Self {
        Self {
            yaw_left: -yaw,
            yaw_right: yaw,
            pitch_up: pitch,
            pitch_down: -pitch,
        }
    }

    pub fn validate(&self) -> Result<(), DmsError> {
        if !(self.yaw_left < self.yaw_right) {
            return Err(DmsError::Config(format!(
                "yaw_left ({}) must be below yaw_right ({})",
                self.yaw_left, self.yaw_right
            )));
        }
        if !(self.pitch_down < self.pitch_up) {
            return Err(DmsError::Config(format!(
                "pitch_down ({}) must be below pitch_up ({})",
                self.pitch_down, self.pitch_up
            )));
        }
        Ok(())
    }

    /// Yaw is checked first, then pitch
    pub fn classify(&self, pitch: f64, yaw: f64) -> HeadDirection {
        if yaw < self.yaw_left {
            HeadDirection::LookingLeft
        } else if yaw > self.yaw_right {
            HeadDirection::LookingRight
        } else if pitch < self.pitch_down {
            HeadDirection::LookingDown
        } else if pitch > self.pitch_up {
            HeadDirection::LookingUp
        } else {
            HeadDirection::Forward
        }
    }
}

/// Approximate pinhole camera
#[derive(Debug, Clone, Copy, PartialEq)]
struct CameraModel {
    width: u32,
    height: u32,
    focal: f64,
    cx: f64,
    cy: f64,
}

impl CameraModel {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            focal: width as f64,
            cx: width as f64 / 2.0,
            cy: height as f64 / 2.0,
        }
    }

    /// Project a camera-space point; `None` behind the camera
    fn project(&self, p: &Vector3<f64>) -> Option<Point> {
        if p.z <= f64::EPSILON {
            return None;
        }
        Some(Point::new(
            self.focal * p.x / p.z + self.cx,
            self.focal * p.y / p.z + self.cy,
        ))
    }

    /// Reprojection residuals for params = (rotation vector, translation)
    fn residuals(&self, params: &Vector6<f64>, observed: &[Point; 6]) -> Option<Residuals> {
        let rotation = Rotation3::new(Vector3::new(params[0], params[1], params[2]));
        let translation = Vector3::new(params[3], params[4], params[5]);

        let mut r = Residuals::zeros();
        for (i, (model, obs)) in MODEL_POINTS.iter().zip(observed).enumerate() {
            let cam = rotation * Vector3::new(model[0], model[1], model[2]) + translation;
            let projected = self.project(&cam)?;
            r[2 * i] = projected.x - obs.x;
            r[2 * i + 1] = projected.y - obs.y;
        }
        Some(r)
    }

    fn jacobian(&self, params: &Vector6<f64>, observed: &[Point; 6]) -> Option<Jacobian> {
        let mut jac = Jacobian::zeros();
        for j in 0..6 {
            let step = 1e-6 * params[j].abs().max(1.0);
            let mut plus = *params;
            let mut minus = *params;
            plus[j] += step;
            minus[j] -= step;
            let column = (self.residuals(&plus, observed)? - self.residuals(&minus, observed)?)
                / (2.0 * step);
            jac.set_column(j, &column);
        }
        Some(jac)
    }

    /// Frontal pose at a distance implied by the eye-corner spread
    fn initial_guess(&self, observed: &[Point; 6]) -> Option<Vector6<f64>> {
        let eye_span = observed[2].distance(&observed[3]);
        if !(eye_span > 1e-6) {
            return None;
        }
        let tz = self.focal * MODEL_EYE_SPAN / eye_span;
        let nose = observed[0];
        Some(Vector6::new(
            0.0,
            0.0,
            0.0,
            (nose.x - self.cx) * tz / self.focal,
            (nose.y - self.cy) * tz / self.focal,
            tz,
        ))
    }

    /// Levenberg-Marquardt on the reprojection error
    fn solve_pnp(&self, observed: &[Point; 6]) -> Option<Rotation3<f64>> {
        let mut params = self.initial_guess(observed)?;
        let mut cost = self.residuals(&params, observed)?.norm_squared();
        let mut lambda = 1e-3;

        for _ in 0..MAX_ITERATIONS {
            let residuals = self.residuals(&params, observed)?;
            let jac = self.jacobian(&params, observed)?;
            let jtj = jac.transpose() * jac;
            let gradient = jac.transpose() * residuals;

            let mut damped = jtj;
            for k in 0..6 {
                damped[(k, k)] += lambda * jtj[(k, k)].max(1e-12);
            }
            let Some(delta) = damped.lu().solve(&(-gradient)) else {
                lambda *= 10.0;
                continue;
            };

            let candidate = params + delta;
            match self.residuals(&candidate, observed) {
                Some(r) if r.norm_squared() < cost => {
                    let improvement = cost - r.norm_squared();
                    params = candidate;
                    cost = r.norm_squared();
                    lambda = (lambda / 10.0).max(1e-12);
                    if delta.norm() < 1e-10 || improvement < 1e-14 * cost.max(1.0) {
                        break;
                    }
                }
                _ => {
                    lambda *= 10.0;
                    if lambda > 1e12 {
                        break;
                    }
                }
            }
        }

        let valid = params.iter().all(|v| v.is_finite()) && params[5] > 0.0;
        if !valid {
            return None;
        }
        debug!(
            "PnP converged: rms reprojection {:.3}px",
            (cost / 6.0).sqrt()
        );
        Some(Rotation3::new(Vector3::new(params[0], params[1], params[2])))
    }
}

/// Decompose R = Rz(roll) * Ry(yaw) * Rx(pitch) into degrees,
/// returned as (pitch, yaw, roll) with pitch positive for chin up.
fn euler_angles(r: &Matrix3<f64>) -> (f64, f64, f64) {
    let alpha = r[(2, 1)].atan2(r[(2, 2)]);
    let beta = (-r[(2, 0)]).atan2(r[(2, 1)].hypot(r[(2, 2)]));
    let gamma = r[(1, 0)].atan2(r[(0, 0)]);
    (-alpha.to_degrees(), beta.to_degrees(), gamma.to_degrees())
}

/// Head pose estimator using facial landmarks
pub struct HeadPoseEstimator {
    thresholds: PoseThresholds,
    camera: Option<CameraModel>,
}

impl HeadPoseEstimator {
    pub fn new(thresholds: PoseThresholds) -> Self {
        Self {
            thresholds,
            camera: None,
        }
    }

    /// Calibrate for the given image size
    pub fn initialize(&mut self, width: u32, height: u32) -> Result<(), DmsError> {
        if width == 0 || height == 0 {
            return Err(DmsError::Config(format!(
                "invalid image size {}x{}",
                width, height
            )));
        }
        self.thresholds.validate()?;
        self.camera = Some(CameraModel::new(width, height));
        info!("Head pose estimator calibrated for {}x{}", width, height);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.camera.is_some()
    }

    pub fn thresholds(&self) -> &PoseThresholds {
        &self.thresholds
    }

    pub fn estimate(&mut self, landmarks: &FaceLandmarks, width: u32, height: u32) -> HeadPose {
        self.estimate_points(&landmarks.pose_points(), width, height)
    }

    /// Estimate from the six model-ordered points (see `FaceLandmarks::pose_points`)
    pub fn estimate_points(&mut self, points: &[Point], width: u32, height: u32) -> HeadPose {
        let Some(camera) = self.camera else {
            return HeadPose::invalid();
        };
        let Ok(observed) = <[Point; 6]>::try_from(points) else {
            return HeadPose::invalid();
        };
        if width == 0 || height == 0 {
            return HeadPose::invalid();
        }

        let camera = if camera.width != width || camera.height != height {
            debug!("Image size changed to {}x{}, recalibrating", width, height);
            let recalibrated = CameraModel::new(width, height);
            self.camera = Some(recalibrated);
            recalibrated
        } else {
            camera
        };

        let Some(rotation) = camera.solve_pnp(&observed) else {
            return HeadPose::invalid();
        };

        let (pitch, yaw, roll) = euler_angles(rotation.matrix());
        if !(pitch.is_finite() && yaw.is_finite() && roll.is_finite()) {
            return HeadPose::invalid();
        }

        HeadPose {
            pitch,
            yaw,
            roll,
            direction: self.thresholds.classify(pitch, yaw),
            is_valid: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIDTH: u32 = 640;
    const HEIGHT: u32 = 480;

    /// Render the model at the given angles (degrees, reporting convention)
    fn synthetic(pitch: f64, yaw: f64, roll: f64) -> Vec<Point> {
        let camera = CameraModel::new(WIDTH, HEIGHT);
        let rotation = Rotation3::from_axis_angle(&Vector3::z_axis(), roll.to_radians())
            * Rotation3::from_axis_angle(&Vector3::y_axis(), yaw.to_radians())
            * Rotation3::from_axis_angle(&Vector3::x_axis(), -pitch.to_radians());
        let translation = Vector3::new(20.0, -10.0, 2500.0);

        MODEL_POINTS
            .iter()
            .map(|m| {
                let cam = rotation * Vector3::new(m[0], m[1], m[2]) + translation;
                camera.project(&cam).unwrap()
            })
            .collect()
    }

    fn estimator() -> HeadPoseEstimator {
        let mut estimator = HeadPoseEstimator::new(PoseThresholds::default());
        estimator.initialize(WIDTH, HEIGHT).unwrap();
        estimator
    }

    #[test]
    fn test_frontal_face_is_forward() {
        let pose = estimator().estimate_points(&synthetic(0.0, 0.0, 0.0), WIDTH, HEIGHT);
        assert!(pose.is_valid);
        assert_eq!(pose.direction, HeadDirection::Forward);
        assert!(pose.pitch.abs() < 0.01);
        assert!(pose.yaw.abs() < 0.01);
        assert!(pose.roll.abs() < 0.01);
    }

    #[test]
    fn test_recovers_rotation() {
        let pose = estimator().estimate_points(&synthetic(10.0, -25.0, 5.0), WIDTH, HEIGHT);
        assert!(pose.is_valid);
        assert!((pose.pitch - 10.0).abs() < 0.05, "pitch {}", pose.pitch);
        assert!((pose.yaw + 25.0).abs() < 0.05, "yaw {}", pose.yaw);
        assert!((pose.roll - 5.0).abs() < 0.05, "roll {}", pose.roll);
        assert_eq!(pose.direction, HeadDirection::LookingLeft);
    }

    #[test]
    fn test_directions() {
        let mut est = estimator();
        let right = est.estimate_points(&synthetic(0.0, 30.0, 0.0), WIDTH, HEIGHT);
        assert_eq!(right.direction, HeadDirection::LookingRight);

        let down = est.estimate_points(&synthetic(-25.0, 0.0, 0.0), WIDTH, HEIGHT);
        assert_eq!(down.direction, HeadDirection::LookingDown);

        let up = est.estimate_points(&synthetic(25.0, 0.0, 0.0), WIDTH, HEIGHT);
        assert_eq!(up.direction, HeadDirection::LookingUp);
    }

    #[test]
    fn test_yaw_checked_before_pitch() {
        let thresholds = PoseThresholds::default();
        assert_eq!(thresholds.classify(40.0, -40.0), HeadDirection::LookingLeft);
        assert_eq!(thresholds.classify(-40.0, 0.0), HeadDirection::LookingDown);
        assert_eq!(thresholds.classify(15.0, 15.0), HeadDirection::Forward);
    }

    #[test]
    fn test_uninitialized_is_invalid() {
        let mut est = HeadPoseEstimator::new(PoseThresholds::default());
        let pose = est.estimate_points(&synthetic(0.0, 0.0, 0.0), WIDTH, HEIGHT);
        assert!(!pose.is_valid);
        assert_eq!(pose.direction, HeadDirection::Unknown);
        assert!(!pose.is_forward());
    }

    #[test]
    fn test_wrong_point_count_is_invalid() {
        let points = synthetic(0.0, 0.0, 0.0);
        let pose = estimator().estimate_points(&points[..4], WIDTH, HEIGHT);
        assert!(!pose.is_valid);
    }

    #[test]
    fn test_degenerate_points_are_invalid() {
        let pose = estimator().estimate_points(&[Point::new(5.0, 5.0); 6], WIDTH, HEIGHT);
        assert!(!pose.is_valid);
    }

    #[test]
    fn test_recalibrates_on_size_change() {
        let mut est = estimator();
        // Same normalised geometry on a camera twice the size
        let points: Vec<Point> = synthetic(0.0, 20.0, 0.0)
            .iter()
            .map(|p| p.scale(2.0))
            .collect();
        let pose = est.estimate_points(&points, WIDTH * 2, HEIGHT * 2);
        assert!(pose.is_valid);
        assert!((pose.yaw - 20.0).abs() < 0.05, "yaw {}", pose.yaw);
        assert_eq!(est.camera.map(|c| c.width), Some(WIDTH * 2));
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let mut est = HeadPoseEstimator::new(PoseThresholds {
            yaw_left: 10.0,
            yaw_right: -10.0,
            ..Default::default()
        });
        assert!(matches!(est.initialize(WIDTH, HEIGHT), Err(DmsError::Config(_))));
        assert!(!est.is_initialized());
    }
}
