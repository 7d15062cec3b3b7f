//! `wagestream-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the stream and
//! treasury ledgers (no IO).

pub mod aggregate;
pub mod clock;
pub mod error;
pub mod id;
pub mod session;

pub use aggregate::{Aggregate, AggregateRoot};
pub use clock::{Clock, ManualClock, SECONDS_PER_DAY, SystemClock, Timestamp};
pub use error::{DomainError, DomainResult};
pub use id::{AccountId, StreamId};
pub use session::{Role, Session};
