//! Eye and mouth aspect ratios
//!
//! Both ratios are pure functions of an ordered point sequence. Malformed or
//! degenerate input yields 0.0 instead of an error so one bad detection never
//! interrupts the frame loop.

use crate::landmarks::{FaceLandmarks, Point};
use serde::{Deserialize, Serialize};

/// Horizontal distances below this are treated as degenerate
pub const EPSILON: f64 = 1e-6;

/// Eye Aspect Ratio over six ordered eyelid points.
///
/// EAR = (|p1 - p5| + |p2 - p4|) / (2 |p0 - p3|)
pub fn calculate_ear(eye: &[Point]) -> f64 {
    if eye.len() != 6 {
        return 0.0;
    }

    let vertical1 = eye[1].distance(&eye[5]);
    let vertical2 = eye[2].distance(&eye[4]);
    let horizontal = eye[0].distance(&eye[3]);

    ratio(vertical1 + vertical2, horizontal)
}

/// Mouth Aspect Ratio over eight ordered inner-lip points.
///
/// MAR = (|p3 - p7| + |p2 - p6| + |p1 - p5|) / (2 |p0 - p4|)
pub fn calculate_mar(mouth: &[Point]) -> f64 {
    if mouth.len() != 8 {
        return 0.0;
    }

    let vertical1 = mouth[3].distance(&mouth[7]);
    let vertical2 = mouth[2].distance(&mouth[6]);
    let vertical3 = mouth[1].distance(&mouth[5]);
    let horizontal = mouth[0].distance(&mouth[4]);

    ratio(vertical1 + vertical2 + vertical3, horizontal)
}

fn ratio(vertical_sum: f64, horizontal: f64) -> f64 {
    // NaN coordinates fall through here too: `NaN < EPSILON` is false
    if !(horizontal >= EPSILON) {
        return 0.0;
    }
    let value = vertical_sum / (2.0 * horizontal);
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Per-frame geometric features
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameFeatures {
    pub left_ear: f64,
    pub right_ear: f64,
    /// Mean of both eyes; the single eye-openness signal
    pub ear: f64,
    pub mar: f64,
}

impl FrameFeatures {
    pub fn from_landmarks(landmarks: &FaceLandmarks) -> Self {
        let left_ear = calculate_ear(landmarks.left_eye());
        let right_ear = calculate_ear(landmarks.right_eye());
        Self {
            left_ear,
            right_ear,
            ear: (left_ear + right_ear) / 2.0,
            mar: calculate_mar(landmarks.mouth()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn eye(open: f64) -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, -open),
            Point::new(2.0, -open),
            Point::new(3.0, 0.0),
            Point::new(2.0, open),
            Point::new(1.0, open),
        ]
    }

    fn mouth(open: f64) -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, -open),
            Point::new(2.0, -open),
            Point::new(3.0, -open),
            Point::new(4.0, 0.0),
            Point::new(3.0, open),
            Point::new(2.0, open),
            Point::new(1.0, open),
        ]
    }

    #[test]
    fn test_ear_known_value() {
        // verticals: |p1-p5| = |p2-p4| = 1.0, horizontal = 3.0
        let ear = calculate_ear(&eye(0.5));
        assert!((ear - 2.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_mar_known_value() {
        // p2-p6 is vertical (2.0); p3-p7 and p1-p5 cross the mouth diagonally
        let mar = calculate_mar(&mouth(1.0));
        let expected = (2.0 + 2.0 * 8f64.sqrt()) / 8.0;
        assert!((mar - expected).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_horizontal() {
        let mut points = eye(0.5);
        points[3] = points[0];
        assert_eq!(calculate_ear(&points), 0.0);

        let mut points = mouth(1.0);
        points[4] = points[0];
        assert_eq!(calculate_mar(&points), 0.0);
    }

    #[test]
    fn test_wrong_cardinality() {
        assert_eq!(calculate_ear(&[]), 0.0);
        assert_eq!(calculate_ear(&eye(0.5)[..5]), 0.0);
        assert_eq!(calculate_mar(&eye(0.5)), 0.0);
    }

    #[test]
    fn test_nan_points_are_neutral() {
        let mut points = eye(0.5);
        points[0] = Point::new(f64::NAN, 0.0);
        assert_eq!(calculate_ear(&points), 0.0);
    }

    proptest! {
        #[test]
        fn prop_ear_scale_invariant(
            open in 0.01f64..5.0,
            width in 0.5f64..50.0,
            scale in 0.1f64..100.0,
        ) {
            let points: Vec<Point> = eye(open)
                .into_iter()
                .map(|p| Point::new(p.x * width, p.y))
                .collect();
            let scaled: Vec<Point> = points.iter().map(|p| p.scale(scale)).collect();

            let a = calculate_ear(&points);
            let b = calculate_ear(&scaled);
            prop_assert!((a - b).abs() <= 1e-9 * a.max(1.0));
        }

        #[test]
        fn prop_ratios_always_finite(
            coords in proptest::collection::vec((-1e6f64..1e6, -1e6f64..1e6), 0..12),
        ) {
            let points: Vec<Point> = coords.into_iter().map(Point::from).collect();
            let ear = calculate_ear(&points);
            let mar = calculate_mar(&points);
            prop_assert!(ear.is_finite() && ear >= 0.0);
            prop_assert!(mar.is_finite() && mar >= 0.0);
            if points.len() != 6 {
                prop_assert_eq!(ear, 0.0);
            }
            if points.len() != 8 {
                prop_assert_eq!(mar, 0.0);
            }
        }
    }
}
