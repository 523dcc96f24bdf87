//! Configuration for the herdsense engine.

use crate::core::error::AnalyticsError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the analytics engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Period of the metrics tick
    #[serde(with = "duration_serde")]
    pub tick_interval: Duration,

    /// How long detection snapshots are retained
    #[serde(with = "duration_serde")]
    pub retention_window: Duration,

    /// Maximum samples kept per track
    pub track_history_cap: usize,

    /// Proximity threshold for herd clustering (distance units)
    pub cluster_threshold: f64,

    /// Clustering strategy used by the herd analyzer
    pub cluster_strategy: ClusterStrategy,

    /// How positions are paired between consecutive snapshots
    pub match_strategy: MatchStrategy,

    /// Maximum number of alerts kept in the alert log
    pub alert_log_capacity: usize,

    /// Maximum number of recent metrics snapshots kept for charts
    pub metrics_history_cap: usize,

    /// Whether alerts repeat every tick or only on crossing
    pub alert_trigger: AlertTrigger,

    /// Noun used in alert messages ("High concentration of ...")
    pub subject: String,

    /// Alert thresholds
    pub thresholds: AlertThresholds,

    /// Path for exporting alert logs and metrics history
    pub export_path: PathBuf,

    /// Path for storing engine statistics
    pub data_path: PathBuf,

    /// Whether the periodic tick is currently stopped
    pub paused: bool,

    /// IANA timezone used when printing timestamps
    pub display_timezone: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("herdsense");

        Self {
            tick_interval: Duration::from_secs(1),
            retention_window: Duration::from_secs(3600), // 1 hour
            track_history_cap: 1000,
            cluster_threshold: 10.0,
            cluster_strategy: ClusterStrategy::default(),
            match_strategy: MatchStrategy::default(),
            alert_log_capacity: 100,
            metrics_history_cap: 60,
            alert_trigger: AlertTrigger::default(),
            subject: "bison".to_string(),
            thresholds: AlertThresholds::default(),
            export_path: data_dir.join("exports"),
            data_path: data_dir,
            paused: false,
            display_timezone: "UTC".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file, falling back to defaults if it is absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("herdsense")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Resolve the display timezone, falling back to UTC for unknown names.
    pub fn timezone(&self) -> chrono_tz::Tz {
        self.display_timezone.parse().unwrap_or(chrono_tz::Tz::UTC)
    }
}

/// Thresholds consulted by the alert evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// Average speed above which a rapid movement alert fires
    pub rapid_movement_speed: f64,
    /// Detection count above which a crowding alert fires
    pub crowding_count: u32,
    /// Reserved. Present for forward compatibility; alert evaluation does not read it.
    pub unusual_activity_zscore: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            rapid_movement_speed: 5.0,
            crowding_count: 15,
            unusual_activity_zscore: 2.5,
        }
    }
}

/// Names accepted by the threshold update operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdName {
    RapidMovement,
    Crowding,
    UnusualActivity,
}

impl ThresholdName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdName::RapidMovement => "rapid_movement",
            ThresholdName::Crowding => "crowding",
            ThresholdName::UnusualActivity => "unusual_activity",
        }
    }
}

impl std::str::FromStr for ThresholdName {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rapid_movement" => Ok(ThresholdName::RapidMovement),
            "crowding" => Ok(ThresholdName::Crowding),
            "unusual_activity" => Ok(ThresholdName::UnusualActivity),
            other => Err(AnalyticsError::InvalidThreshold {
                name: other.to_string(),
                value: f64::NAN,
                reason: "unknown threshold name".to_string(),
            }),
        }
    }
}

impl AlertThresholds {
    /// Apply a single threshold update.
    ///
    /// The value is validated first; on rejection `self` is left untouched.
    pub fn set(&mut self, name: ThresholdName, value: f64) -> Result<(), AnalyticsError> {
        let reject = |reason: &str| AnalyticsError::InvalidThreshold {
            name: name.as_str().to_string(),
            value,
            reason: reason.to_string(),
        };

        if !value.is_finite() {
            return Err(reject("value must be finite"));
        }
        if value < 0.0 {
            return Err(reject("value must not be negative"));
        }

        match name {
            ThresholdName::RapidMovement => self.rapid_movement_speed = value,
            ThresholdName::Crowding => {
                if value.fract() != 0.0 || value > u32::MAX as f64 {
                    return Err(reject("crowding threshold must be a whole count"));
                }
                self.crowding_count = value as u32;
            }
            ThresholdName::UnusualActivity => {
                if value == 0.0 {
                    return Err(reject("z-score threshold must be positive"));
                }
                self.unusual_activity_zscore = value;
            }
        }
        Ok(())
    }
}

/// Herd clustering strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStrategy {
    /// Single pass, seed-distance, order dependent
    #[default]
    Greedy,
    /// Transitive single-linkage grouping
    Linked,
}

/// How positions in consecutive snapshots are paired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Match by track id, falling back to list position when ids are missing
    #[default]
    Identity,
    /// Always match by list position
    Positional,
}

/// Alert emission policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertTrigger {
    /// Emit on every tick while the condition holds
    #[default]
    Level,
    /// Emit only when the condition changes
    Edge,
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
