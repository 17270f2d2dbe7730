//! Facial landmark model (68-point iBUG 300-W layout)

use crate::DmsError;
use serde::{Deserialize, Serialize};

/// Number of landmarks produced by the face model
pub const FACE_LANDMARK_COUNT: usize = 68;

const RIGHT_EYE: std::ops::RangeInclusive<usize> = 36..=41;
const LEFT_EYE: std::ops::RangeInclusive<usize> = 42..=47;
const INNER_MOUTH: std::ops::RangeInclusive<usize> = 60..=67;

const NOSE_TIP: usize = 30;
const CHIN: usize = 8;
const LEFT_EYE_OUTER: usize = 36;
const RIGHT_EYE_OUTER: usize = 45;
const MOUTH_LEFT: usize = 48;
const MOUTH_RIGHT: usize = 54;

/// 2D image point (pixels)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn scale(&self, factor: f64) -> Point {
        Point::new(self.x * factor, self.y * factor)
    }

    pub fn offset(&self, dx: f64, dy: f64) -> Point {
        Point::new(self.x + dx, self.y + dy)
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Point::new(x, y)
    }
}

impl From<Point> for (f64, f64) {
    fn from(p: Point) -> Self {
        (p.x, p.y)
    }
}

/// Face bounding box (pixels)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl FaceRegion {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Grow the box around its centre by `factor` (1.0 = unchanged)
    pub fn expand(&self, factor: f64) -> FaceRegion {
        let width = self.width * factor;
        let height = self.height * factor;
        FaceRegion {
            x: self.x - (width - self.width) / 2.0,
            y: self.y - (height - self.height) / 2.0,
            width,
            height,
        }
    }

    /// Intersect with the image rectangle
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> FaceRegion {
        let x0 = self.x.clamp(0.0, image_width as f64);
        let y0 = self.y.clamp(0.0, image_height as f64);
        let x1 = (self.x + self.width).clamp(0.0, image_width as f64);
        let y1 = (self.y + self.height).clamp(0.0, image_height as f64);
        FaceRegion::new(x0, y0, x1 - x0, y1 - y0)
    }

    pub fn scale(&self, factor: f64) -> FaceRegion {
        FaceRegion::new(
            self.x * factor,
            self.y * factor,
            self.width * factor,
            self.height * factor,
        )
    }

    pub fn offset(&self, dx: f64, dy: f64) -> FaceRegion {
        FaceRegion::new(self.x + dx, self.y + dy, self.width, self.height)
    }
}

/// Complete 68-point landmark set for one face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point>", into = "Vec<Point>")]
pub struct FaceLandmarks {
    points: Vec<Point>,
}

impl FaceLandmarks {
    /// Wrap a landmark vector, rejecting anything but exactly 68 points
    pub fn new(points: Vec<Point>) -> Result<Self, DmsError> {
        if points.len() != FACE_LANDMARK_COUNT {
            return Err(DmsError::LandmarkCount {
                expected: FACE_LANDMARK_COUNT,
                actual: points.len(),
            });
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn part(&self, index: usize) -> Option<Point> {
        self.points.get(index).copied()
    }

    /// Driver's right eye (image left), six points starting at the outer corner
    pub fn right_eye(&self) -> &[Point] {
        &self.points[RIGHT_EYE]
    }

    /// Driver's left eye, six points starting at the inner corner
    pub fn left_eye(&self) -> &[Point] {
        &self.points[LEFT_EYE]
    }

    /// Inner lip contour, eight points starting at the left corner
    pub fn mouth(&self) -> &[Point] {
        &self.points[INNER_MOUTH]
    }

    /// Points matching the 3D head model, in model order:
    /// nose tip, chin, left eye outer corner, right eye outer corner,
    /// left mouth corner, right mouth corner
    pub fn pose_points(&self) -> [Point; 6] {
        [
            self.points[NOSE_TIP],
            self.points[CHIN],
            self.points[LEFT_EYE_OUTER],
            self.points[RIGHT_EYE_OUTER],
            self.points[MOUTH_LEFT],
            self.points[MOUTH_RIGHT],
        ]
    }

    /// Map every point with `scale` then `offset`
    pub fn transform(&self, scale: f64, dx: f64, dy: f64) -> FaceLandmarks {
        FaceLandmarks {
            points: self
                .points
                .iter()
                .map(|p| p.scale(scale).offset(dx, dy))
                .collect(),
        }
    }
}

impl TryFrom<Vec<Point>> for FaceLandmarks {
    type Error = DmsError;

    fn try_from(points: Vec<Point>) -> Result<Self, Self::Error> {
        FaceLandmarks::new(points)
    }
}

impl From<FaceLandmarks> for Vec<Point> {
    fn from(landmarks: FaceLandmarks) -> Self {
        landmarks.points
    }
}

/// One face reported by the external detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub region: FaceRegion,
    /// Missing when the landmark model failed on this face
    #[serde(default)]
    pub landmarks: Option<FaceLandmarks>,
}

/// The driver is the nearest, i.e. largest, face
pub fn largest_face(faces: &[FaceDetection]) -> Option<&FaceDetection> {
    faces.iter().max_by(|a, b| a.region.area().total_cmp(&b.region.area()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered() -> FaceLandmarks {
        FaceLandmarks::new((0..68).map(|i| Point::new(i as f64, 0.0)).collect()).unwrap()
    }

    #[test]
    fn test_rejects_wrong_count() {
        let err = FaceLandmarks::new(vec![Point::default(); 5]).unwrap_err();
        assert!(matches!(
            err,
            DmsError::LandmarkCount { expected: 68, actual: 5 }
        ));
    }

    #[test]
    fn test_feature_slices() {
        let lm = numbered();
        assert_eq!(lm.right_eye().len(), 6);
        assert_eq!(lm.right_eye()[0].x, 36.0);
        assert_eq!(lm.left_eye()[0].x, 42.0);
        assert_eq!(lm.mouth().len(), 8);
        assert_eq!(lm.mouth()[7].x, 67.0);

        let pose: Vec<f64> = lm.pose_points().iter().map(|p| p.x).collect();
        assert_eq!(pose, vec![30.0, 8.0, 36.0, 45.0, 48.0, 54.0]);
    }

    #[test]
    fn test_largest_face_wins() {
        let small = FaceDetection {
            region: FaceRegion::new(0.0, 0.0, 10.0, 10.0),
            landmarks: None,
        };
        let big = FaceDetection {
            region: FaceRegion::new(50.0, 50.0, 40.0, 30.0),
            landmarks: None,
        };
        let faces = vec![small, big.clone()];
        assert_eq!(largest_face(&faces), Some(&big));
        assert_eq!(largest_face(&[]), None);
    }

    #[test]
    fn test_region_expand_and_clamp() {
        let region = FaceRegion::new(10.0, 10.0, 20.0, 20.0).expand(2.0);
        assert_eq!(region, FaceRegion::new(0.0, 0.0, 40.0, 40.0));

        let clamped = FaceRegion::new(-5.0, 90.0, 20.0, 20.0).clamp_to(100, 100);
        assert_eq!(clamped, FaceRegion::new(0.0, 90.0, 15.0, 10.0));
    }

    #[test]
    fn test_landmarks_deserialize_from_pairs() {
        let pairs: Vec<(f64, f64)> = (0..68).map(|i| (i as f64, 1.0)).collect();
        let json = serde_json::to_string(&pairs).unwrap();
        let lm: FaceLandmarks = serde_json::from_str(&json).unwrap();
        assert_eq!(lm.part(67), Some(Point::new(67.0, 1.0)));

        let short = serde_json::to_string(&pairs[..10]).unwrap();
        assert!(serde_json::from_str::<FaceLandmarks>(&short).is_err());
    }
}
