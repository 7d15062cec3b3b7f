//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every variant except `LedgerDesync` is recoverable and is raised before any
/// state changes. `LedgerDesync` means a record no longer satisfies the
/// accounting invariants and must not be mutated until it is resynchronized.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Non-positive amounts or durations, malformed account identifiers.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The operation is not valid for the record's current status.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The request exceeds the funds that are free to use.
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: u64, available: u64 },

    /// Unknown stream or treasury.
    #[error("{0} not found")]
    NotFound(String),

    /// The record was already created.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Withdrawal requested but nothing has accrued since the last one.
    #[error("nothing to withdraw")]
    NothingToWithdraw,

    /// The session is not allowed to act on this record.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// An accounting invariant does not hold; the record needs a full resync.
    #[error("ledger desynchronized: {0}")]
    LedgerDesync(String),
}

impl DomainError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn insufficient_funds(requested: u64, available: u64) -> Self {
        Self::InsufficientFunds {
            requested,
            available,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn desync(msg: impl Into<String>) -> Self {
        Self::LedgerDesync(msg.into())
    }

    /// Whether the caller may fix the request and try again.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DomainError::LedgerDesync(_))
    }
}
