//! Seam to the authoritative external ledger.
//!
//! The ledger owns the real balances; implementations of [`ExternalLedger`]
//! translate these calls into whatever transport reaches it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use wagestream_core::{AccountId, StreamId};
use wagestream_ledger::CreateStream;
use wagestream_streams::StreamRecord;
use wagestream_treasury::TreasuryRecord;

/// Receipt for a write the ledger accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub token: Uuid,
    /// Id the ledger assigned, for stream creation.
    pub stream_id: Option<StreamId>,
}

impl Confirmation {
    pub fn new(stream_id: Option<StreamId>) -> Self {
        Self {
            token: Uuid::now_v7(),
            stream_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[async_trait]
pub trait ExternalLedger: Send + Sync {
    async fn fetch_stream(&self, id: StreamId) -> LedgerResult<StreamRecord>;

    async fn fetch_treasury(&self, owner: &AccountId) -> LedgerResult<TreasuryRecord>;

    /// Streams where `account` is the employer or the employee.
    async fn list_streams(&self, account: &AccountId) -> LedgerResult<Vec<StreamRecord>>;

    async fn initialize_treasury(
        &self,
        owner: &AccountId,
        initial_deposit: u64,
    ) -> LedgerResult<Confirmation>;

    async fn deposit(&self, owner: &AccountId, amount: u64) -> LedgerResult<Confirmation>;

    async fn withdraw(&self, owner: &AccountId, amount: u64) -> LedgerResult<Confirmation>;

    async fn set_reserve(&self, owner: &AccountId, amount: u64) -> LedgerResult<Confirmation>;

    async fn create_stream(&self, request: &CreateStream) -> LedgerResult<Confirmation>;

    async fn pause_stream(&self, id: StreamId) -> LedgerResult<Confirmation>;

    async fn resume_stream(&self, id: StreamId) -> LedgerResult<Confirmation>;

    async fn terminate_stream(&self, id: StreamId) -> LedgerResult<Confirmation>;

    async fn withdraw_wages(&self, id: StreamId) -> LedgerResult<Confirmation>;

    async fn complete_stream(&self, id: StreamId) -> LedgerResult<Confirmation>;

    /// Hand the stream to arbitration; resolution happens outside the client.
    async fn raise_dispute(&self, id: StreamId) -> LedgerResult<Confirmation>;
}
