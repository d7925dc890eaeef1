//! Engine configuration.
//!
//! Defaults match the platform's standard cache profile (STRICT, 5 minute
//! TTL, batches of 50). Every field can be overridden from the environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `GATEHOUSE_CHECK_MODE` | `check_mode` (`strict` / `loose`) |
//! | `GATEHOUSE_CACHE_TTL_SECS` | `cache_ttl` |
//! | `GATEHOUSE_MAX_BATCH_SIZE` | `max_batch_size` |
//! | `GATEHOUSE_CHECK_TIMEOUT_MS` | `check_timeout` |
//! | `GATEHOUSE_BATCH_CONCURRENCY` | `batch_concurrency` |
//! | `GATEHOUSE_SWEEP_INTERVAL_SECS` | `sweep_interval` |

use core::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a decision looks like when the grant store cannot be reached.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckMode {
    /// Deny with `reason = ERROR`.
    #[default]
    Strict,
    /// Allow at the narrowest scope with `reason = ERROR`.
    Loose,
}

impl FromStr for CheckMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(CheckMode::Strict),
            "loose" => Ok(CheckMode::Loose),
            other => Err(ConfigError::Invalid {
                key: "GATEHOUSE_CHECK_MODE",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub check_mode: CheckMode,
    #[serde(rename = "cache_ttl_secs", with = "secs")]
    pub cache_ttl: Duration,
    pub max_batch_size: usize,
    #[serde(rename = "check_timeout_ms", with = "millis")]
    pub check_timeout: Duration,
    pub batch_concurrency: usize,
    #[serde(rename = "sweep_interval_secs", with = "secs")]
    pub sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            check_mode: CheckMode::Strict,
            cache_ttl: Duration::from_secs(300),
            max_batch_size: 50,
            check_timeout: Duration::from_secs(10),
            batch_concurrency: 8,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    /// Longer TTL and bigger batches for read-heavy deployments.
    pub fn high_throughput() -> Self {
        Self {
            cache_ttl: Duration::from_secs(600),
            max_batch_size: 200,
            batch_concurrency: 16,
            ..Self::default()
        }
    }

    /// Shorter TTL and smaller batches; the sweeper runs more often.
    pub fn low_memory() -> Self {
        Self {
            cache_ttl: Duration::from_secs(180),
            max_batch_size: 50,
            batch_concurrency: 4,
            sweep_interval: Duration::from_secs(30),
            ..Self::default()
        }
    }

    pub fn with_check_mode(mut self, mode: CheckMode) -> Self {
        self.check_mode = mode;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    pub fn with_batch_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_concurrency = concurrency;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::Zero("max_batch_size"));
        }
        if self.batch_concurrency == 0 {
            return Err(ConfigError::Zero("batch_concurrency"));
        }
        if self.check_timeout.is_zero() {
            return Err(ConfigError::Zero("check_timeout"));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Zero("sweep_interval"));
        }
        Ok(())
    }

    /// Defaults overridden by any `GATEHOUSE_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] over an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("GATEHOUSE_CHECK_MODE") {
            config.check_mode = v.parse()?;
        }
        if let Some(v) = lookup("GATEHOUSE_CACHE_TTL_SECS") {
            config.cache_ttl = Duration::from_secs(parse_number("GATEHOUSE_CACHE_TTL_SECS", &v)?);
        }
        if let Some(v) = lookup("GATEHOUSE_MAX_BATCH_SIZE") {
            config.max_batch_size = parse_number("GATEHOUSE_MAX_BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("GATEHOUSE_CHECK_TIMEOUT_MS") {
            config.check_timeout =
                Duration::from_millis(parse_number("GATEHOUSE_CHECK_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("GATEHOUSE_BATCH_CONCURRENCY") {
            config.batch_concurrency = parse_number("GATEHOUSE_BATCH_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("GATEHOUSE_SWEEP_INTERVAL_SECS") {
            config.sweep_interval =
                Duration::from_secs(parse_number("GATEHOUSE_SWEEP_INTERVAL_SECS", &v)?);
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_number<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
