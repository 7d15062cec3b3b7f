//! Bookkeeping for submitted mutations.
//!
//! Every write gets an entry when it is submitted and keeps it after it
//! resolves, so callers can see what happened to each request.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wagestream_core::{AccountId, StreamId};

/// A record the mirror tracks separately.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordKey {
    Stream(StreamId),
    Treasury(AccountId),
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKey::Stream(id) => write!(f, "{id}"),
            RecordKey::Treasury(owner) => write!(f, "treasury {owner}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    /// Sent, no answer yet.
    Submitted,
    /// Ledger confirmed and the records were re-read.
    Confirmed,
    /// Ledger refused; the optimistic change was rolled back.
    Rejected,
    /// No answer in time; rolled back, outcome unknown until the next read.
    Unconfirmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mutation {
    pub id: Uuid,
    pub operation: &'static str,
    pub records: Vec<RecordKey>,
    pub status: MutationStatus,
    pub submitted_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub confirmation: Option<Uuid>,
    pub error: Option<String>,
}

/// Log of mutations, oldest first.
#[derive(Debug, Default)]
pub struct PendingMutations {
    entries: Mutex<Vec<Mutation>>,
}

impl PendingMutations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&self, operation: &'static str, records: Vec<RecordKey>) -> Uuid {
        let id = Uuid::now_v7();
        self.entries().push(Mutation {
            id,
            operation,
            records,
            status: MutationStatus::Submitted,
            submitted_at: Utc::now(),
            resolved_at: None,
            confirmation: None,
            error: None,
        });
        id
    }

    pub fn mark_confirmed(&self, id: Uuid, token: Uuid) {
        self.resolve(id, MutationStatus::Confirmed, Some(token), None);
    }

    pub fn mark_rejected(&self, id: Uuid, error: String) {
        self.resolve(id, MutationStatus::Rejected, None, Some(error));
    }

    pub fn mark_unconfirmed(&self, id: Uuid, error: String) {
        self.resolve(id, MutationStatus::Unconfirmed, None, Some(error));
    }

    pub fn get(&self, id: Uuid) -> Option<Mutation> {
        self.entries().iter().find(|m| m.id == id).cloned()
    }

    /// Mutations in submission order.
    pub fn list(&self) -> Vec<Mutation> {
        self.entries().clone()
    }

    pub fn with_status(&self, status: MutationStatus) -> Vec<Mutation> {
        self.entries()
            .iter()
            .filter(|m| m.status == status)
            .cloned()
            .collect()
    }

    fn resolve(
        &self,
        id: Uuid,
        status: MutationStatus,
        confirmation: Option<Uuid>,
        error: Option<String>,
    ) {
        if let Some(entry) = self.entries().iter_mut().find(|m| m.id == id) {
            entry.status = status;
            entry.resolved_at = Some(Utc::now());
            entry.confirmation = confirmation;
            entry.error = error;
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Mutation>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_their_final_status() {
        let log = PendingMutations::new();
        let a = log.submit("pause_stream", vec![RecordKey::Stream(StreamId::FIRST)]);
        let b = log.submit("deposit", vec![]);
        let token = Uuid::now_v7();

        log.mark_confirmed(a, token);
        log.mark_rejected(b, "no".into());

        assert_eq!(log.get(a).unwrap().confirmation, Some(token));
        assert_eq!(log.with_status(MutationStatus::Rejected).len(), 1);
        let ops: Vec<_> = log.list().iter().map(|m| m.operation).collect();
        assert_eq!(ops, vec!["pause_stream", "deposit"]);
    }
}
