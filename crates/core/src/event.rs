use chrono::{DateTime, Utc};

/// A domain fact produced by an aggregate's decision logic.
///
/// Events are immutable and carry a stable type name so the infrastructure
/// layer can log and audit them without knowing the concrete domain.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "listing.shares_purchased").
    fn event_type(&self) -> &'static str;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
