//! Decide/apply contract shared by wage streams and employer treasuries.

use crate::clock::Timestamp;

/// A ledger record with a stable key and a count of applied events.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Number of events applied so far. Starts at zero for a fresh record.
    fn version(&self) -> u64;
}

/// Commands are checked against current state and produce events; events are
/// the only way state changes.
///
/// `handle` takes `&self`, so a refused command cannot leave a record half
/// updated. The ledger time is an argument: records never read a clock.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn apply(&mut self, event: &Self::Event);

    fn handle(
        &self,
        command: &Self::Command,
        now: Timestamp,
    ) -> Result<Vec<Self::Event>, Self::Error>;
}
