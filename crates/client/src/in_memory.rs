//! In-process ledger for tests and local simulation.
//!
//! Applies every write to its own [`PayrollBook`] with the shared clock, and
//! can be told to misbehave on upcoming calls so the mirror's rollback and
//! timeout paths can be driven deterministically.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use wagestream_core::{AccountId, Clock, DomainError, DomainResult, StreamId, Timestamp};
use wagestream_ledger::{CreateStream, PayrollBook, Posting};
use wagestream_streams::{DisputeOutcome, StreamRecord};
use wagestream_treasury::TreasuryRecord;

use crate::ledger::{Confirmation, ExternalLedger, LedgerError, LedgerResult};

/// Misbehaviour for the next write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFault {
    /// Refuse the write without applying it.
    Reject,
    /// Fail as unreachable without applying the write.
    Unavailable,
    /// Apply the write but never answer.
    DropConfirmation,
    /// Apply and answer after a delay.
    Delay(Duration),
}

#[derive(Debug, Default)]
struct Faults {
    writes: VecDeque<WriteFault>,
    failing_reads: u32,
    stream_overrides: HashMap<StreamId, StreamRecord>,
}

#[derive(Debug)]
pub struct InMemoryLedger<C> {
    book: Mutex<PayrollBook>,
    faults: Mutex<Faults>,
    clock: C,
}

impl<C: Clock> InMemoryLedger<C> {
    pub fn new(clock: C) -> Self {
        Self {
            book: Mutex::new(PayrollBook::new()),
            faults: Mutex::new(Faults::default()),
            clock,
        }
    }

    /// Queue a fault for an upcoming write (first in, first used).
    pub fn inject(&self, fault: WriteFault) {
        self.faults().writes.push_back(fault);
    }

    /// Make the next `count` reads fail as unavailable.
    pub fn fail_reads(&self, count: u32) {
        self.faults().failing_reads = count;
    }

    /// Serve `record` for its stream instead of the real state.
    pub fn override_stream_record(&self, record: StreamRecord) {
        self.faults()
            .stream_overrides
            .insert(record.stream_id, record);
    }

    pub fn clear_overrides(&self) {
        self.faults().stream_overrides.clear();
    }

    /// Apply an arbitration outcome to a disputed stream.
    pub fn arbitrate(&self, id: StreamId, outcome: DisputeOutcome) -> LedgerResult<Confirmation> {
        let now = self.clock.now();
        let posting = self.book().resolve_dispute(id, outcome, now);
        confirm(posting)
    }

    /// Copy of the authoritative state.
    pub fn snapshot(&self) -> PayrollBook {
        self.book().clone()
    }

    fn book(&self) -> MutexGuard<'_, PayrollBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_fault(&self) -> LedgerResult<()> {
        let mut faults = self.faults();
        if faults.failing_reads > 0 {
            faults.failing_reads -= 1;
            return Err(LedgerError::Unavailable("injected read failure".into()));
        }
        Ok(())
    }

    async fn write<F>(&self, op: F) -> LedgerResult<Confirmation>
    where
        F: FnOnce(&mut PayrollBook, Timestamp) -> DomainResult<Posting>,
    {
        let fault = self.faults().writes.pop_front();
        match fault {
            Some(WriteFault::Reject) => {
                return Err(LedgerError::Rejected("injected rejection".into()));
            }
            Some(WriteFault::Unavailable) => {
                return Err(LedgerError::Unavailable("injected outage".into()));
            }
            Some(WriteFault::Delay(delay)) => tokio::time::sleep(delay).await,
            Some(WriteFault::DropConfirmation) | None => {}
        }

        let now = self.clock.now();
        let result = {
            let mut book = self.book();
            op(&mut book, now)
        };
        let confirmation = confirm(result)?;

        if fault == Some(WriteFault::DropConfirmation) {
            std::future::pending::<()>().await;
        }
        Ok(confirmation)
    }
}

fn confirm(result: DomainResult<Posting>) -> LedgerResult<Confirmation> {
    match result {
        Ok(posting) => Ok(Confirmation::new(posting.created_stream)),
        Err(DomainError::NotFound(what)) => Err(LedgerError::NotFound(what)),
        Err(err) => Err(LedgerError::Rejected(err.to_string())),
    }
}

#[async_trait]
impl<C: Clock> ExternalLedger for InMemoryLedger<C> {
    async fn fetch_stream(&self, id: StreamId) -> LedgerResult<StreamRecord> {
        self.read_fault()?;
        if let Some(record) = self.faults().stream_overrides.get(&id) {
            return Ok(record.clone());
        }
        self.book()
            .stream(id)
            .map(|s| s.to_record())
            .map_err(|_| LedgerError::NotFound(id.to_string()))
    }

    async fn fetch_treasury(&self, owner: &AccountId) -> LedgerResult<TreasuryRecord> {
        self.read_fault()?;
        self.book()
            .treasury(owner)
            .map(|t| t.to_record())
            .map_err(|_| LedgerError::NotFound(format!("treasury {owner}")))
    }

    async fn list_streams(&self, account: &AccountId) -> LedgerResult<Vec<StreamRecord>> {
        self.read_fault()?;
        let overrides = self.faults().stream_overrides.clone();
        Ok(self
            .book()
            .streams()
            .filter(|s| s.employer() == account || s.employee() == account)
            .map(|s| {
                overrides
                    .get(&s.id_typed())
                    .cloned()
                    .unwrap_or_else(|| s.to_record())
            })
            .collect())
    }

    async fn initialize_treasury(
        &self,
        owner: &AccountId,
        initial_deposit: u64,
    ) -> LedgerResult<Confirmation> {
        let owner = owner.clone();
        self.write(move |book, now| book.initialize_treasury(owner, initial_deposit, now))
            .await
    }

    async fn deposit(&self, owner: &AccountId, amount: u64) -> LedgerResult<Confirmation> {
        self.write(|book, now| book.deposit(owner, amount, now)).await
    }

    async fn withdraw(&self, owner: &AccountId, amount: u64) -> LedgerResult<Confirmation> {
        self.write(|book, now| book.withdraw(owner, amount, now)).await
    }

    async fn set_reserve(&self, owner: &AccountId, amount: u64) -> LedgerResult<Confirmation> {
        self.write(|book, now| book.set_reserve(owner, amount, now)).await
    }

    async fn create_stream(&self, request: &CreateStream) -> LedgerResult<Confirmation> {
        self.write(|book, now| book.create_stream(request, now)).await
    }

    async fn pause_stream(&self, id: StreamId) -> LedgerResult<Confirmation> {
        self.write(|book, now| book.pause_stream(id, now)).await
    }

    async fn resume_stream(&self, id: StreamId) -> LedgerResult<Confirmation> {
        self.write(|book, now| book.resume_stream(id, now)).await
    }

    async fn terminate_stream(&self, id: StreamId) -> LedgerResult<Confirmation> {
        self.write(|book, now| book.terminate_stream(id, now)).await
    }

    async fn withdraw_wages(&self, id: StreamId) -> LedgerResult<Confirmation> {
        self.write(|book, now| book.withdraw_wages(id, now)).await
    }

    async fn complete_stream(&self, id: StreamId) -> LedgerResult<Confirmation> {
        self.write(|book, now| book.complete_stream(id, now)).await
    }

    async fn raise_dispute(&self, id: StreamId) -> LedgerResult<Confirmation> {
        self.write(|book, now| book.raise_dispute(id, now)).await
    }
}
