use serde::Deserialize;
use std::path::Path;

/// Configuration for the prediction engine
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionConfig {
    /// IANA timezone of the transit agency, e.g. "America/Los_Angeles".
    /// All schedule times are interpreted in this zone (default: Etc/UTC)
    #[serde(default = "PredictionConfig::default_timezone")]
    pub timezone: String,
    /// Snapshots older than this many seconds are treated as stale and
    /// their realtime data is ignored (default: 90)
    #[serde(default = "PredictionConfig::default_staleness_threshold_secs")]
    pub staleness_threshold_secs: u64,
    /// Raw time values at or above this are read as Unix timestamps.
    /// This is a heuristic cutoff, not something the feed declares (default: 1_000_000_000)
    #[serde(default = "PredictionConfig::default_epoch_cutoff")]
    pub epoch_cutoff: i64,
    /// Largest raw time value still accepted as seconds since midnight.
    /// 172800 covers post-midnight trips up to 48:00:00 (default: 172800)
    #[serde(default = "PredictionConfig::default_time_of_day_ceiling_secs")]
    pub time_of_day_ceiling_secs: i64,
    /// How many seconds past its predicted time a stop is still reported
    /// for vehicles that do not announce their position in the stop
    /// sequence (default: 120)
    #[serde(default = "PredictionConfig::default_grace_period_secs")]
    pub grace_period_secs: u64,
    /// Delay thresholds for the on-time status categories
    #[serde(default)]
    pub thresholds: StatusThresholds,
}

/// Delay thresholds (in seconds) separating the status categories
#[derive(Debug, Clone, Deserialize)]
pub struct StatusThresholds {
    /// Delays strictly greater than this count as delayed (default: 300)
    #[serde(default = "StatusThresholds::default_delayed_after_secs")]
    pub delayed_after_secs: i64,
    /// Running more than this many seconds ahead of schedule counts as
    /// early (default: 180)
    #[serde(default = "StatusThresholds::default_early_before_secs")]
    pub early_before_secs: i64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            timezone: Self::default_timezone(),
            staleness_threshold_secs: Self::default_staleness_threshold_secs(),
            epoch_cutoff: Self::default_epoch_cutoff(),
            time_of_day_ceiling_secs: Self::default_time_of_day_ceiling_secs(),
            grace_period_secs: Self::default_grace_period_secs(),
            thresholds: StatusThresholds::default(),
        }
    }
}

impl PredictionConfig {
    fn default_timezone() -> String {
        "Etc/UTC".to_string()
    }
    fn default_staleness_threshold_secs() -> u64 {
        90
    }
    fn default_epoch_cutoff() -> i64 {
        1_000_000_000
    }
    fn default_time_of_day_ceiling_secs() -> i64 {
        172_800
    }
    fn default_grace_period_secs() -> u64 {
        120
    }

    /// Resolve the configured timezone name against the IANA database.
    pub fn parsed_timezone(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.timezone.clone()))
    }
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            delayed_after_secs: Self::default_delayed_after_secs(),
            early_before_secs: Self::default_early_before_secs(),
        }
    }
}

impl StatusThresholds {
    fn default_delayed_after_secs() -> i64 {
        300
    }
    fn default_early_before_secs() -> i64 {
        180
    }
}

impl PredictionConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("Unknown IANA timezone: {0}")]
    InvalidTimezone(String),
}
