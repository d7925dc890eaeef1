use chrono::{DateTime, Utc};

/// A fact that something happened.
///
/// Events are immutable and carry a stable type name plus a schema version so
/// consumers (audit pipelines, cross-node relays) can evolve independently.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. `"grant.revoked"`).
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When it happened.
    fn occurred_at(&self) -> DateTime<Utc>;
}
