use chrono::{DateTime, TimeZone, Utc};

use wagestream_core::Timestamp;

/// A domain-agnostic ledger event.
///
/// Events are immutable facts, versioned for schema evolution and designed to
/// be appended, never edited.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "streams.stream.paused").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// Ledger time (Unix seconds) at which the event took effect.
    fn occurred_at(&self) -> Timestamp;

    /// `occurred_at` as a UTC datetime, for display and journaling.
    fn occurred_at_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.occurred_at(), 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}
