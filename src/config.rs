//! Configuration for the Gaze Event Agent.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Per-stream pipeline settings
    pub pipeline: PipelineConfig,

    /// Path for exporting emitted gaze events
    pub export_path: PathBuf,

    /// Path for storing stats
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gaze-event-agent");

        Self {
            pipeline: PipelineConfig::default(),
            export_path: data_dir.join("exports"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path, falling back to defaults
    /// when the file does not exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.pipeline.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gaze-event-agent")
            .join("config.json")
    }

    /// Path of the persisted stats file.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)?;
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }
}

/// Settings for one stream's windowed pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Half-width of the classification window. The buffer holds
    /// `2 × time_window` of history and classifies its midpoint.
    #[serde(with = "duration_millis")]
    pub time_window: Duration,

    /// Capacity of the bounded frame queue in front of each stream
    pub frame_queue_capacity: usize,

    pub blink: BlinkConfig,

    pub gaze: GazeConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            time_window: Duration::from_millis(500),
            frame_queue_capacity: 256,
            blink: BlinkConfig::default(),
            gaze: GazeConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Reject settings that would make a stream meaningless.
    ///
    /// This is the only failure that aborts a stream, and it happens before
    /// any frame is accepted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.time_window.is_zero() {
            return Err(ConfigError::Invalid("time_window must be non-zero".into()));
        }
        if self.frame_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "frame_queue_capacity must be at least 1".into(),
            ));
        }
        self.blink.validate()?;
        self.gaze.validate()
    }

    /// Full buffered span (`2 × time_window`) as a chrono duration.
    pub fn buffer_span(&self) -> chrono::Duration {
        let millis = (self.time_window * 2).as_millis().min(i64::MAX as u128 / 2) as i64;
        chrono::Duration::milliseconds(millis)
    }
}

/// Blink detector tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlinkConfig {
    /// A dip is an EAR below `baseline × dip_ratio`
    pub dip_ratio: f64,
    /// Baselines below this mean the eyes were closed for the whole window
    pub min_open_ear: f64,
    /// Longest closure still counted as a blink
    #[serde(with = "duration_millis")]
    pub max_blink_duration: Duration,
    /// How far outside the dip the center may sit and still be flagged
    #[serde(with = "duration_millis")]
    pub adjacency: Duration,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            dip_ratio: 0.7,
            min_open_ear: 0.1,
            max_blink_duration: Duration::from_millis(500),
            adjacency: Duration::from_millis(40),
        }
    }
}

impl BlinkConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.dip_ratio > 0.0 && self.dip_ratio < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "blink.dip_ratio must be in (0, 1), got {}",
                self.dip_ratio
            )));
        }
        if !self.min_open_ear.is_finite() || self.min_open_ear < 0.0 {
            return Err(ConfigError::Invalid(
                "blink.min_open_ear must be a non-negative number".into(),
            ));
        }
        if self.max_blink_duration.is_zero() {
            return Err(ConfigError::Invalid(
                "blink.max_blink_duration must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Face gating and movement classification thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GazeConfig {
    /// Head/eye-region motion above this disables iris tracking
    pub max_eye_speed: f64,
    /// Absolute yaw (degrees) above which iris geometry is unreliable
    pub max_yaw_deg: f64,
    /// Absolute pitch (degrees) above which iris geometry is unreliable
    pub max_pitch_deg: f64,
    /// Frame-normalised iris velocity (per second) separating saccades from fixations
    pub saccade_velocity_threshold: f64,
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            max_eye_speed: 0.25,
            max_yaw_deg: 25.0,
            max_pitch_deg: 30.0,
            saccade_velocity_threshold: 0.2,
        }
    }
}

impl GazeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("gaze.max_eye_speed", self.max_eye_speed),
            ("gaze.max_yaw_deg", self.max_yaw_deg),
            ("gaze.max_pitch_deg", self.max_pitch_deg),
            (
                "gaze.saccade_velocity_threshold",
                self.saccade_velocity_threshold,
            ),
        ];
        for (name, value) in checks {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as whole milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
