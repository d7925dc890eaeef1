//! Process-wide tracing setup shared by every gatehouse binary.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use tracing::{LogFormat, ObservabilityConfig, init_with};

/// JSON logs, `RUST_LOG` or `info`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init_with(&ObservabilityConfig::default());
}
