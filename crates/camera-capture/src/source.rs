//! Frame sources

use crate::{CameraConfig, CameraError, VideoFrame};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Sequential frame retrieval.
///
/// `Ok(None)` signals end of stream.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError>;
}

/// Replays a directory of still images in file-name order
pub struct ImageDirSource {
    files: Vec<PathBuf>,
    position: usize,
}

impl ImageDirSource {
    /// Open a directory of frames
    pub fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        let dir = Path::new(&config.frames_dir);
        let entries = std::fs::read_dir(dir)
            .map_err(|e| CameraError::Open(format!("{}: {}", dir.display(), e)))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| config.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(CameraError::Open(format!(
                "no frames found in {}",
                dir.display()
            )));
        }

        info!("Opened {} with {} frames", dir.display(), files.len());
        Ok(Self { files, position: 0 })
    }

    /// Number of frames in the directory
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        while let Some(path) = self.files.get(self.position) {
            let sequence = self.position as u32;
            self.position += 1;

            match image::open(path) {
                Ok(img) => {
                    debug!("Loaded frame {} from {}", sequence, path.display());
                    let timestamp_ns = std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .map(|d| d.as_nanos() as u64)
                        .unwrap_or(0);
                    return Ok(Some(VideoFrame::from_rgb_image(
                        img.to_rgb8(),
                        timestamp_ns,
                        sequence,
                    )));
                }
                Err(e) => {
                    // An unreadable file is skipped, not treated as end of stream
                    warn!("Skipping unreadable frame {}: {}", path.display(), e);
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replays_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, shade) in [("002.png", 20u8), ("001.png", 10), ("003.png", 30)] {
            image::RgbImage::from_pixel(4, 4, image::Rgb([shade, 0, 0]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let config = CameraConfig {
            frames_dir: dir.path().to_string_lossy().into_owned(),
            ..Default::default()
        };
        let mut source = ImageDirSource::open(&config).unwrap();
        assert_eq!(source.len(), 3);

        let mut shades = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            shades.push(frame.get_pixel(0, 0).unwrap()[0]);
        }
        assert_eq!(shades, vec![10, 20, 30]);
    }

    #[test]
    fn test_missing_directory() {
        let config = CameraConfig {
            frames_dir: "/nonexistent/frames".to_string(),
            ..Default::default()
        };
        assert!(matches!(ImageDirSource::open(&config), Err(CameraError::Open(_))));
    }
}
