//! `wagestream-ledger`: stream and treasury books kept in lock-step.
//!
//! Every operation either applies all of its stream and treasury effects or
//! none of them.

pub mod book;

pub use book::{CreateStream, PayrollBook, Posting};
