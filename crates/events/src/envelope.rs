use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Event;

/// Envelope for a confirmed event, carrying journal metadata.
///
/// - `aggregate_key` names the record the event belongs to (a stream id or a
///   treasury owner).
/// - `sequence_number` is monotonically increasing within one journal.
/// - `confirmation` is the external ledger's token for the write that
///   produced the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    aggregate_type: String,
    aggregate_key: String,
    sequence_number: u64,
    event_type: String,
    schema_version: u32,
    occurred_at: DateTime<Utc>,
    confirmation: Option<Uuid>,
    payload: E,
}

impl<E: Event> EventEnvelope<E> {
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_key: impl Into<String>,
        sequence_number: u64,
        confirmation: Option<Uuid>,
        payload: E,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            aggregate_type: aggregate_type.into(),
            aggregate_key: aggregate_key.into(),
            sequence_number,
            event_type: payload.event_type().to_string(),
            schema_version: payload.version(),
            occurred_at: payload.occurred_at_utc(),
            confirmation,
            payload,
        }
    }
}

impl<E> EventEnvelope<E> {
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn aggregate_key(&self) -> &str {
        &self.aggregate_key
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn confirmation(&self) -> Option<Uuid> {
        self.confirmation
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }
}
