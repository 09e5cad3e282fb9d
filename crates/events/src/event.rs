use chrono::{DateTime, Utc};

/// A domain event.
///
/// Events are facts (a loan was disbursed, a deposit was reversed). They are
/// versioned for schema evolution and only ever appended.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "lending.loan.disbursed").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
