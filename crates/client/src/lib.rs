//! Client for the external payroll ledger.
//!
//! [`LedgerMirror`] keeps a local, always-consistent copy of the streams and
//! treasuries an account cares about, validates every write locally before
//! submitting it through an [`ExternalLedger`], and reconciles with the
//! ledger's answer. [`InMemoryLedger`] stands in for the real ledger in tests
//! and simulations.

pub mod config;
pub mod error;
pub mod in_memory;
pub mod journal;
pub mod ledger;
pub mod mirror;
pub mod pending;
pub mod retry;

pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use in_memory::{InMemoryLedger, WriteFault};
pub use journal::{Journal, PayrollEvent};
pub use ledger::{Confirmation, ExternalLedger, LedgerError, LedgerResult};
pub use mirror::{LedgerMirror, NewStream};
pub use pending::{Mutation, MutationStatus, PendingMutations, RecordKey};
pub use retry::ReadRetry;
