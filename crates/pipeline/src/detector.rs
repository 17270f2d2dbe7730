//! Face and landmark detection collaborators

use crate::PipelineError;
use camera_capture::VideoFrame;
use dms::{FaceDetection, FaceLandmarks, FaceRegion, Point};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

/// External face and landmark model.
///
/// Returns every face found in `frame`, in that frame's pixel coordinates.
/// A face whose landmark fit failed is reported with `landmarks: None`.
pub trait LandmarkDetector {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<FaceDetection>, PipelineError>;
}

impl<D: LandmarkDetector + ?Sized> LandmarkDetector for Box<D> {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<FaceDetection>, PipelineError> {
        (**self).detect(frame)
    }
}

#[derive(Debug, Deserialize)]
struct RecordedFrame {
    #[serde(default)]
    faces: Vec<RecordedFace>,
}

#[derive(Debug, Deserialize)]
struct RecordedFace {
    region: FaceRegion,
    #[serde(default)]
    landmarks: Option<Vec<Point>>,
}

/// Replays detector output recorded as JSON Lines, one line per processed frame:
///
/// `{"faces": [{"region": {"x":..,"y":..,"width":..,"height":..}, "landmarks": [[x, y], ...]}]}`
///
/// Coordinates are in source-frame pixels. Once the recording runs out every
/// further frame has no face.
pub struct ReplayDetector {
    lines: Box<dyn Iterator<Item = std::io::Result<String>> + Send>,
    name: String,
    line_no: usize,
    exhausted: bool,
}

impl ReplayDetector {
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let file = File::open(path)
            .map_err(|e| PipelineError::Detector(format!("{}: {}", path.display(), e)))?;
        info!("Replaying landmarks from {}", path.display());
        Ok(Self::from_reader(BufReader::new(file), path.display().to_string()))
    }

    pub fn from_reader<R: BufRead + Send + 'static>(reader: R, name: impl Into<String>) -> Self {
        Self {
            lines: Box::new(reader.lines()),
            name: name.into(),
            line_no: 0,
            exhausted: false,
        }
    }

    fn parse(&self, line: &str) -> Result<Vec<FaceDetection>, PipelineError> {
        if line.trim().is_empty() {
            return Ok(Vec::new());
        }

        let recorded: RecordedFrame = serde_json::from_str(line)
            .map_err(|e| PipelineError::Detector(format!("{}:{}: {}", self.name, self.line_no, e)))?;

        let faces = recorded
            .faces
            .into_iter()
            .map(|face| {
                let landmarks = face.landmarks.and_then(|points| match FaceLandmarks::new(points) {
                    Ok(landmarks) => Some(landmarks),
                    Err(e) => {
                        warn!("{}:{}: {}", self.name, self.line_no, e);
                        None
                    }
                });
                FaceDetection {
                    region: face.region,
                    landmarks,
                }
            })
            .collect();
        Ok(faces)
    }
}

impl LandmarkDetector for ReplayDetector {
    fn detect(&mut self, _frame: &VideoFrame) -> Result<Vec<FaceDetection>, PipelineError> {
        if self.exhausted {
            return Ok(Vec::new());
        }

        match self.lines.next() {
            Some(Ok(line)) => {
                self.line_no += 1;
                self.parse(&line)
            }
            Some(Err(e)) => {
                self.line_no += 1;
                Err(PipelineError::Detector(format!("{}:{}: {}", self.name, self.line_no, e)))
            }
            None => {
                debug!("Landmark recording {} exhausted after {} lines", self.name, self.line_no);
                self.exhausted = true;
                Ok(Vec::new())
            }
        }
    }
}
