//! Layered application settings

use crate::monitor::LogPolicy;
use crate::PipelineError;
use camera_capture::CameraConfig;
use config::{Config, Environment, File};
use dms::DmsConfig;
use event_log::LoggerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::Level;

/// Environment variables override file settings, e.g. `DROWSINESS_DMS__EAR_THRESHOLD=0.22`
pub const ENV_PREFIX: &str = "DROWSINESS";

/// Frame loop throughput options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Process every n-th frame
    pub frame_skip: u32,
    /// Run detection on a copy downscaled to this width
    pub resize_width: Option<u32>,
    /// Run detection on a crop around the previous face first
    pub use_roi: bool,
    /// Extra margin around the previous face, as a fraction of its size
    pub roi_expand: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            frame_skip: 1,
            resize_width: None,
            use_roi: false,
            roi_expand: 0.5,
        }
    }
}

/// Recorded input for the replay binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub frames_dir: String,
    pub extensions: Vec<String>,
    /// JSON Lines file with one detector result per processed frame
    pub landmarks_path: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        let camera = CameraConfig::default();
        Self {
            frames_dir: camera.frames_dir,
            extensions: camera.extensions,
            landmarks_path: PathBuf::from("landmarks.jsonl"),
        }
    }
}

impl SourceConfig {
    pub fn camera_config(&self) -> CameraConfig {
        CameraConfig {
            frames_dir: self.frames_dir.clone(),
            extensions: self.extensions.clone(),
        }
    }
}

/// Complete, immutable run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dms: DmsConfig,
    pub logging: LoggerConfig,
    pub performance: PerformanceConfig,
    pub source: SourceConfig,
    pub log_policy: LogPolicy,
    /// Diagnostic log level (`error` .. `trace`)
    pub log_level: String,
    /// Emit diagnostics as JSON
    pub log_json: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dms: DmsConfig::default(),
            logging: LoggerConfig::default(),
            performance: PerformanceConfig::default(),
            source: SourceConfig::default(),
            log_policy: LogPolicy::default(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl Settings {
    /// Defaults, then `path` if given, then `DROWSINESS_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        self.dms.validate()?;
        self.logging.validate()?;

        if self.performance.frame_skip == 0 {
            return Err(PipelineError::Config("frame_skip must be at least 1".into()));
        }
        if self.performance.resize_width == Some(0) {
            return Err(PipelineError::Config("resize_width must be positive".into()));
        }
        let expand = self.performance.roi_expand;
        if !(expand.is_finite() && expand >= 0.0) {
            return Err(PipelineError::Config(format!(
                "roi_expand must be a non-negative number, got {}",
                expand
            )));
        }
        self.level()?;
        Ok(())
    }

    pub fn level(&self) -> Result<Level, PipelineError> {
        self.log_level
            .parse::<Level>()
            .map_err(|_| PipelineError::Config(format!("unknown log level '{}'", self.log_level)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_log::LogFormat;
    use std::io::Write;

    fn write_settings(contents: &str, extension: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(extension)
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.dms.ear_threshold, 0.25);
        assert_eq!(settings.performance.frame_skip, 1);
        assert_eq!(settings.log_policy, LogPolicy::Transitions);
        assert_eq!(settings.logging.log_filename, "drowsiness_log.jsonl");
    }

    #[test]
    fn test_load_toml_file() {
        let file = write_settings(
            r#"
log_policy = "every_non_alert"

[dms]
ear_threshold = 0.21
enable_head_pose = true

[dms.head_pose]
yaw_left = -20.0
yaw_right = 20.0

[logging]
log_format = "plain_text"
save_snapshots = false

[performance]
resize_width = 320
"#,
            ".toml",
        );

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.dms.ear_threshold, 0.21);
        assert_eq!(settings.dms.mar_threshold, 0.7);
        assert!(settings.dms.enable_head_pose);
        assert_eq!(settings.dms.head_pose.yaw_right, 20.0);
        assert_eq!(settings.dms.head_pose.pitch_up, 15.0);
        assert_eq!(settings.logging.log_format, LogFormat::PlainText);
        assert!(!settings.logging.save_snapshots);
        assert_eq!(settings.performance.resize_width, Some(320));
        assert_eq!(settings.log_policy, LogPolicy::EveryNonAlert);
    }

    #[test]
    fn test_environment_overrides() {
        std::env::set_var("DROWSINESS_LOGGING__QUEUE_CAPACITY", "77");
        let settings = Settings::load(None);
        std::env::remove_var("DROWSINESS_LOGGING__QUEUE_CAPACITY");

        assert_eq!(settings.unwrap().logging.queue_capacity, 77);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let file = write_settings("[performance]\nframe_skip = 0\n", ".toml");
        assert!(matches!(
            Settings::load(Some(file.path())),
            Err(PipelineError::Config(_))
        ));

        let file = write_settings(r#"{"dms": {"drowsy_time_seconds": -1.0}}"#, ".json");
        assert!(matches!(
            Settings::load(Some(file.path())),
            Err(PipelineError::Dms(_))
        ));

        let inverted = Settings {
            dms: DmsConfig {
                head_pose: dms::PoseThresholds {
                    yaw_left: 10.0,
                    yaw_right: -10.0,
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let bad_level = Settings {
            log_level: "loud".to_string(),
            ..Default::default()
        };
        assert!(bad_level.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Settings::load(Some(Path::new("/nonexistent/settings.toml"))).is_err());
    }
}
