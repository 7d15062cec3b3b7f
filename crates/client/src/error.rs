use std::time::Duration;

use thiserror::Error;

use wagestream_core::DomainError;

use crate::ledger::LedgerError;

/// Errors surfaced by [`crate::LedgerMirror`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Local validation failed; nothing was submitted.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The external ledger refused the write.
    #[error("ledger rejected the request: {0}")]
    Rejected(String),

    /// No confirmation arrived in time. The write may still land; the
    /// affected records are re-read before the next mutation touches them.
    #[error("no confirmation within {0:?}")]
    Timeout(Duration),

    /// The ledger could not be reached.
    #[error("ledger unavailable: {0}")]
    Transient(String),

    /// The record failed an accounting check and awaits `resync`.
    #[error("{0} is halted until resync")]
    Halted(String),
}

impl ClientError {
    /// Whether the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Timeout(_) | ClientError::Transient(_))
    }
}

impl From<LedgerError> for ClientError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Rejected(reason) => ClientError::Rejected(reason),
            LedgerError::NotFound(what) => ClientError::Domain(DomainError::NotFound(what)),
            LedgerError::Unavailable(reason) => ClientError::Transient(reason),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
