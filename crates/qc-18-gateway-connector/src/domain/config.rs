//! Connector configuration with validation.
//!
//! Every section carries defaults, so a partial TOML file is enough:
//!
//! ```toml
//! [rate_limit.per_sender]
//! max_events = 10
//! window = "1s"
//!
//! [timeouts]
//! default = "20s"
//! margin = "100ms"
//! ```

use crate::telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound for `timeouts.margin`
pub const MAX_TIMEOUT_MARGIN: Duration = Duration::from_secs(60);

/// Upper bound for `sweep.interval`
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Upper bound for a rate limit window
pub const MAX_RATE_WINDOW: Duration = Duration::from_secs(86_400);

/// Main connector configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Inbound rate limiting
    pub rate_limit: RateLimitConfig,
    /// Request deadlines
    pub timeouts: TimeoutConfig,
    /// Stale entry sweep
    pub sweep: SweepConfig,
    /// Log output
    pub telemetry: TelemetryConfig,
}

impl ConnectorConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limit.global.validate("global")?;
        self.rate_limit.per_sender.validate("per_sender")?;

        if self.timeouts.default.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "default timeout cannot be 0".into(),
            ));
        }
        if self.timeouts.default.as_millis() > u128::from(u32::MAX) {
            return Err(ConfigError::InvalidTimeout(
                "default timeout does not fit in u32 milliseconds".into(),
            ));
        }

        if self.timeouts.margin > MAX_TIMEOUT_MARGIN {
            return Err(ConfigError::InvalidTimeout(format!(
                "timeout margin cannot exceed {}s",
                MAX_TIMEOUT_MARGIN.as_secs()
            )));
        }

        if self.sweep.enabled && self.sweep.interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "sweep interval cannot be 0".into(),
            ));
        }
        if self.sweep.enabled && self.sweep.interval > MAX_SWEEP_INTERVAL {
            return Err(ConfigError::InvalidTimeout(format!(
                "sweep interval cannot exceed {}s",
                MAX_SWEEP_INTERVAL.as_secs()
            )));
        }

        Ok(())
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }
}

/// Inbound rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Limit across all senders
    pub global: QuotaConfig,
    /// Limit per sender identity
    pub per_sender: QuotaConfig,
    /// Senders that bypass rate limiting
    pub exempt_senders: Vec<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            global: QuotaConfig::new(100, Duration::from_secs(1)),
            per_sender: QuotaConfig::new(100, Duration::from_secs(1)),
            exempt_senders: Vec::new(),
        }
    }
}

/// At most `max_events` within `window`, all of them usable as a burst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub max_events: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl QuotaConfig {
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self { max_events, window }
    }

    /// Interval at which a single event slot is replenished
    pub fn replenish_interval(&self) -> Option<Duration> {
        if self.max_events == 0 {
            return None;
        }
        self.window
            .checked_div(self.max_events)
            .filter(|interval| !interval.is_zero())
    }

    fn validate(&self, scope: &str) -> Result<(), ConfigError> {
        if self.max_events == 0 {
            return Err(ConfigError::InvalidRateLimit(format!(
                "{scope}.max_events cannot be 0"
            )));
        }
        if self.window.is_zero() {
            return Err(ConfigError::InvalidRateLimit(format!(
                "{scope}.window cannot be 0"
            )));
        }
        if self.window > MAX_RATE_WINDOW {
            return Err(ConfigError::InvalidRateLimit(format!(
                "{scope}.window cannot exceed {}s",
                MAX_RATE_WINDOW.as_secs()
            )));
        }
        if self.replenish_interval().is_none() {
            return Err(ConfigError::InvalidRateLimit(format!(
                "{scope}.window is too short for {} events",
                self.max_events
            )));
        }
        Ok(())
    }
}

/// Request deadline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Applied when a request does not carry its own timeout
    #[serde(with = "humantime_serde")]
    pub default: Duration,
    /// Added to every request timeout so the gateway can answer before the
    /// local deadline fires
    #[serde(with = "humantime_serde")]
    pub margin: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default: Duration::from_millis(20_000),
            margin: Duration::from_millis(100),
        }
    }
}

/// Background sweep of stale correlator entries and idle limiter state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(10),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Invalid rate limiting configuration
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// Method not in the gateway method registry
    #[error("invalid outgoing connector handler method: {0}")]
    InvalidMethod(String),
    /// Malformed configuration file
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    /// Configuration file could not be read
    #[error("failed to read configuration: {0}")]
    Io(String),
}

/// Duration (de)serialization as "20s", "100ms" or "1m"
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" must be checked before the single-letter suffixes
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map_err(|_| "invalid minutes")?
                .checked_mul(60)
                .map(Duration::from_secs)
                .ok_or("minutes out of range")
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
