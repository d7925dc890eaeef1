//! Tracing/logging initialization.
//!
//! Audit events arrive under the `gatehouse::audit` target, so they can be
//! routed separately, e.g. `RUST_LOG=info,gatehouse::audit=off`.

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Used when `RUST_LOG` is unset or invalid.
    pub default_filter: String,
    pub format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl ObservabilityConfig {
    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// Install the global subscriber. Safe to call multiple times (subsequent
/// calls are no-ops).
pub fn init_with(config: &ObservabilityConfig) {
    let builder = tracing_subscriber::fmt().with_env_filter(config.filter());

    // Keep targets: audit consumers filter on them.
    let _ = match config.format {
        LogFormat::Json => builder
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(true)
            .try_init(),
        LogFormat::Pretty => builder.pretty().with_target(true).try_init(),
    };
}
