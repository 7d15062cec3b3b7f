//! Ledger events: the facts produced by stream and treasury aggregates, and the
//! envelope used to journal them once the external ledger has confirmed them.

pub mod envelope;
pub mod event;

pub use envelope::EventEnvelope;
pub use event::Event;
