//! stepscale.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Startup configuration problems. These are fatal: the daemon refuses to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration for `{field}`: {value:?}")]
    Duration { field: &'static str, value: String },

    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Number of reconciliation workers draining the queue.
    pub workers: usize,
    /// Interval of the periodic full resync (e.g. "30s").
    pub resync_interval: String,
    /// How often both caches are garbage collected.
    pub gc_interval: String,
    pub metrics: MetricsConfig,
    pub history: HistoryConfig,
    pub backoff: BackoffConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Samples retained per entity.
    pub window_capacity: usize,
    pub ttl: String,
    /// Base URL of the Prometheus server, e.g. "http://prometheus:9090".
    pub prometheus_url: Option<String>,
    pub request_timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Scaling events retained per target. Bounds the longest cooldown.
    pub capacity: usize,
    pub ttl: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base: String,
    pub max: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            resync_interval: "30s".to_string(),
            gc_interval: "1m".to_string(),
            metrics: MetricsConfig::default(),
            history: HistoryConfig::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_capacity: 15,
            ttl: "15m".to_string(),
            prometheus_url: None,
            request_timeout: "10s".to_string(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 15,
            ttl: "15m".to_string(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: "5ms".to_string(),
            max: "1000s".to_string(),
        }
    }
}

impl ControllerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ControllerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every field once so later accessors cannot fail at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Zero("workers"));
        }
        if self.metrics.window_capacity == 0 {
            return Err(ConfigError::Zero("metrics.window_capacity"));
        }
        if self.history.capacity == 0 {
            return Err(ConfigError::Zero("history.capacity"));
        }
        self.resync_interval()?;
        self.gc_interval()?;
        self.metrics_ttl()?;
        self.metrics_request_timeout()?;
        self.history_ttl()?;
        self.backoff_base()?;
        self.backoff_max()?;
        Ok(())
    }

    /// Never zero; a zero-period ticker cannot be built.
    pub fn resync_interval(&self) -> Result<Duration, ConfigError> {
        nonzero_field("resync_interval", &self.resync_interval)
    }

    pub fn gc_interval(&self) -> Result<Duration, ConfigError> {
        nonzero_field("gc_interval", &self.gc_interval)
    }

    pub fn metrics_ttl(&self) -> Result<Duration, ConfigError> {
        field("metrics.ttl", &self.metrics.ttl)
    }

    pub fn metrics_request_timeout(&self) -> Result<Duration, ConfigError> {
        field("metrics.request_timeout", &self.metrics.request_timeout)
    }

    pub fn history_ttl(&self) -> Result<Duration, ConfigError> {
        field("history.ttl", &self.history.ttl)
    }

    pub fn backoff_base(&self) -> Result<Duration, ConfigError> {
        field("backoff.base", &self.backoff.base)
    }

    pub fn backoff_max(&self) -> Result<Duration, ConfigError> {
        field("backoff.max", &self.backoff.max)
    }
}

fn field(name: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field: name,
        value: value.to_string(),
    })
}

fn nonzero_field(name: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match field(name, value)? {
        d if d.is_zero() => Err(ConfigError::Zero(name)),
        d => Ok(d),
    }
}

/// Parse a duration string like "500ms", "30s", "5m", "1h".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        let m = mins.parse::<u64>().ok()?;
        m.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        let h = hours.parse::<u64>().ok()?;
        h.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
