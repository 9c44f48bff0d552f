// Layered configuration for the sharkspot pipeline

use crate::geometry::{BoxOrigin, Size};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|mut p| {
            p.push("sharkspot");
            p
        })
        .unwrap_or_else(|| PathBuf::from("./sharkspot"))
}

/// Which frames and predictions are kept while a recording is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Only frames whose batch contains the target label
    #[default]
    TargetPresent,
    /// Every frame delivered while recording
    WhileRecording,
}

impl AdmissionPolicy {
    pub fn admits(&self, contains_target: bool) -> bool {
        match self {
            AdmissionPolicy::TargetPresent => contains_target,
            AdmissionPolicy::WhileRecording => true,
        }
    }
}

/// Classifier and target-class settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Label whose presence gates recording
    pub target_label: String,
    /// Model input resolution (width, height)
    pub model_input_size: (u32, u32),
    /// Corner the model measures normalized boxes from
    pub model_origin: BoxOrigin,
    /// Path to the model artifact handed to the classifier backend
    pub model_path: PathBuf,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            target_label: "shark".to_string(),
            model_input_size: (640, 640),
            model_origin: BoxOrigin::BottomLeft,
            model_path: default_data_dir().join("models").join("best.model"),
        }
    }
}

impl DetectionConfig {
    pub fn model_input(&self) -> Size {
        Size::new(self.model_input_size.0 as f64, self.model_input_size.1 as f64)
    }
}

/// Video recording settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Fixed artifact path; any previous file here is replaced on start
    pub output_path: PathBuf,
    /// Assumed capture rate used to advance presentation time
    pub frame_rate: u32,
    pub admission: AdmissionPolicy,
    /// Persistent media library folder finished recordings are imported into
    pub library_dir: PathBuf,
    /// FourCC handed to encoding sinks, e.g. `mp4v` or `MJPG`
    pub codec: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            output_path: data_dir.join("recording.ssrv"),
            frame_rate: 30,
            admission: AdmissionPolicy::TargetPresent,
            library_dir: data_dir.join("library"),
            codec: "mp4v".to_string(),
        }
    }
}

impl RecordingConfig {
    /// Fixed presentation-time increment per admitted frame
    pub fn frame_duration(&self) -> Duration {
        let rate = self.frame_rate.max(1) as u64;
        Duration::from_nanos(1_000_000_000 / rate)
    }
}

/// Sampler and prediction persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub sampling_interval_ms: u64,
    /// Folder that per-session prediction folders are created in
    pub predictions_root: PathBuf,
    /// Base name of session folders (`Predictions`, `Predictions_1`, ...)
    pub predictions_prefix: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            sampling_interval_ms: 1000,
            predictions_root: default_data_dir(),
            predictions_prefix: "Predictions".to_string(),
        }
    }
}

impl MetricsConfig {
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotterConfig {
    pub detection: DetectionConfig,
    pub recording: RecordingConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

impl SpotterConfig {
    /// Load configuration from a JSON, TOML or YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_str(&content)
    }

    /// Parse configuration, trying JSON, then TOML, then YAML
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        if let Ok(config) = serde_json::from_str::<SpotterConfig>(content) {
            return Ok(config);
        }

        if let Ok(config) = toml::from_str::<SpotterConfig>(content) {
            return Ok(config);
        }

        if let Ok(config) = serde_yaml::from_str::<SpotterConfig>(content) {
            return Ok(config);
        }

        Err(ConfigError::ParseError("Unknown format".to_string()))
    }

    /// Defaults overlaid with `SHARKSPOT_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay `SHARKSPOT_*` environment variables onto this configuration
    pub fn apply_env(&mut self) {
        if let Ok(label) = std::env::var("SHARKSPOT_TARGET_LABEL") {
            self.detection.target_label = label;
        }

        if let Ok(interval) = std::env::var("SHARKSPOT_SAMPLING_INTERVAL_MS") {
            if let Ok(ms) = interval.parse::<u64>() {
                self.metrics.sampling_interval_ms = ms;
            }
        }

        if let Ok(path) = std::env::var("SHARKSPOT_OUTPUT_PATH") {
            self.recording.output_path = PathBuf::from(path);
        }

        if let Ok(dir) = std::env::var("SHARKSPOT_PREDICTIONS_DIR") {
            self.metrics.predictions_root = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("SHARKSPOT_LIBRARY_DIR") {
            self.recording.library_dir = PathBuf::from(dir);
        }

        if let Ok(level) = std::env::var("SHARKSPOT_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection.target_label.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "detection.target_label cannot be empty".to_string(),
            ));
        }

        let (width, height) = self.detection.model_input_size;
        if width == 0 || height == 0 {
            return Err(ConfigError::ValidationError(
                "detection.model_input_size must be non-zero".to_string(),
            ));
        }

        if self.recording.frame_rate == 0 || self.recording.frame_rate > 240 {
            return Err(ConfigError::ValidationError(
                "recording.frame_rate must be between 1 and 240".to_string(),
            ));
        }

        let codec = &self.recording.codec;
        if codec.len() != 4 || !codec.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
            return Err(ConfigError::ValidationError(format!(
                "recording.codec '{}' must be a four character code",
                codec
            )));
        }

        if self.metrics.sampling_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "metrics.sampling_interval_ms must be > 0".to_string(),
            ));
        }

        let prefix = &self.metrics.predictions_prefix;
        if prefix.is_empty() || prefix.contains('/') || prefix.contains('\\') || prefix.contains("..") {
            return Err(ConfigError::ValidationError(format!(
                "metrics.predictions_prefix '{}' must be a plain folder name",
                prefix
            )));
        }

        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Parse error: {}", e),
            ConfigError::ValidationError(e) => write!(f, "Validation error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for crate::error::Error {
    fn from(err: ConfigError) -> Self {
        crate::error::Error::Configuration(err.to_string())
    }
}
