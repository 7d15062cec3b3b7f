//! Journal of confirmed ledger events as seen by this client.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wagestream_core::Timestamp;
use wagestream_events::{Event, EventEnvelope};
use wagestream_ledger::Posting;
use wagestream_streams::StreamEvent;
use wagestream_treasury::TreasuryEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ledger", content = "event", rename_all = "lowercase")]
pub enum PayrollEvent {
    Stream(StreamEvent),
    Treasury(TreasuryEvent),
}

impl PayrollEvent {
    fn aggregate(&self) -> (&'static str, String) {
        match self {
            PayrollEvent::Stream(e) => ("wage_stream", e.stream_id().to_string()),
            PayrollEvent::Treasury(e) => ("employer_treasury", e.owner().to_string()),
        }
    }
}

impl Event for PayrollEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PayrollEvent::Stream(e) => e.event_type(),
            PayrollEvent::Treasury(e) => e.event_type(),
        }
    }

    fn version(&self) -> u32 {
        match self {
            PayrollEvent::Stream(e) => e.version(),
            PayrollEvent::Treasury(e) => e.version(),
        }
    }

    fn occurred_at(&self) -> Timestamp {
        match self {
            PayrollEvent::Stream(e) => e.occurred_at(),
            PayrollEvent::Treasury(e) => e.occurred_at(),
        }
    }
}

/// Append-only, in-process.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Mutex<Vec<EventEnvelope<PayrollEvent>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the events of a confirmed posting under its confirmation token.
    pub fn record(&self, posting: &Posting, confirmation: Uuid) {
        let events = posting
            .stream_events
            .iter()
            .cloned()
            .map(PayrollEvent::Stream)
            .chain(
                posting
                    .treasury_events
                    .iter()
                    .cloned()
                    .map(PayrollEvent::Treasury),
            );

        let mut entries = self.entries();
        for event in events {
            let sequence = entries.len() as u64 + 1;
            let (aggregate_type, key) = event.aggregate();
            entries.push(EventEnvelope::new(
                aggregate_type,
                key,
                sequence,
                Some(confirmation),
                event,
            ));
        }
    }

    pub fn entries_snapshot(&self) -> Vec<EventEnvelope<PayrollEvent>> {
        self.entries().clone()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// The journal as JSON lines, one envelope per line.
    pub fn export_json_lines(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for entry in self.entries().iter() {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        Ok(out)
    }

    fn entries(&self) -> MutexGuard<'_, Vec<EventEnvelope<PayrollEvent>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
