//! The pair of ledgers (streams + treasuries) with atomic cross-aggregate
//! operations.
//!
//! ## Posting flow
//!
//! ```text
//! request
//!   ↓
//! 1. stream.handle(cmd, now)          (pure; may reject)
//!   ↓
//! 2. derive treasury commands from the stream events
//!   ↓
//! 3. treasury.handle(...) on a scratch copy   (pure; may reject)
//!   ↓
//! 4. commit stream + treasury together, then re-check invariants
//! ```
//!
//! Nothing is written until every step has succeeded, so a rejected request
//! leaves every balance untouched. An invariant failure after step 4 is a bug
//! in this crate, not a caller error, and aborts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use wagestream_core::{AccountId, Aggregate, DomainError, DomainResult, StreamId, Timestamp};
use wagestream_streams::{
    DisputeOutcome, OpenStream, StreamCommand, StreamEvent, StreamRecord, WageStream,
};
use wagestream_treasury::{
    EmployerTreasury, InitializeTreasury, TreasuryCommand, TreasuryEvent, TreasuryRecord,
};

/// Request to open a new wage stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateStream {
    pub employer: AccountId,
    pub employee: AccountId,
    pub total_amount: u64,
    pub duration_seconds: u64,
    pub description: String,
}

/// Everything a successful operation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Posting {
    /// Set when the operation created a stream.
    pub created_stream: Option<StreamId>,
    pub stream_events: Vec<StreamEvent>,
    pub treasury_events: Vec<TreasuryEvent>,
}

/// In-memory books for streams and employer treasuries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayrollBook {
    streams: BTreeMap<StreamId, WageStream>,
    treasuries: BTreeMap<AccountId, EmployerTreasury>,
    next_stream_id: StreamId,
}

impl Default for PayrollBook {
    fn default() -> Self {
        Self::new()
    }
}

impl PayrollBook {
    pub fn new() -> Self {
        Self {
            streams: BTreeMap::new(),
            treasuries: BTreeMap::new(),
            next_stream_id: StreamId::FIRST,
        }
    }

    // ---- queries ----

    pub fn stream(&self, id: StreamId) -> DomainResult<&WageStream> {
        self.streams
            .get(&id)
            .ok_or_else(|| DomainError::not_found(id.to_string()))
    }

    pub fn treasury(&self, owner: &AccountId) -> DomainResult<&EmployerTreasury> {
        self.treasuries
            .get(owner)
            .ok_or_else(|| DomainError::not_found(format!("treasury {owner}")))
    }

    pub fn streams(&self) -> impl Iterator<Item = &WageStream> {
        self.streams.values()
    }

    pub fn streams_for_employer<'a>(
        &'a self,
        employer: &'a AccountId,
    ) -> impl Iterator<Item = &'a WageStream> + 'a {
        self.streams.values().filter(move |s| s.employer() == employer)
    }

    pub fn streams_for_employee<'a>(
        &'a self,
        employee: &'a AccountId,
    ) -> impl Iterator<Item = &'a WageStream> + 'a {
        self.streams.values().filter(move |s| s.employee() == employee)
    }

    /// The identifier the next created stream will receive.
    pub fn next_stream_id(&self) -> StreamId {
        self.next_stream_id
    }

    // ---- treasury operations ----

    pub fn initialize_treasury(
        &mut self,
        owner: AccountId,
        initial_deposit: u64,
        now: Timestamp,
    ) -> DomainResult<Posting> {
        if self.treasuries.contains_key(&owner) {
            return Err(DomainError::already_exists(format!("treasury {owner}")));
        }
        let event = EmployerTreasury::initialize(
            &InitializeTreasury {
                owner: owner.clone(),
                initial_deposit,
            },
            now,
        );
        self.treasuries
            .insert(owner, EmployerTreasury::initialized(&event));
        Ok(Posting {
            treasury_events: vec![TreasuryEvent::Initialized(event)],
            ..Posting::default()
        })
    }

    pub fn deposit(&mut self, owner: &AccountId, amount: u64, now: Timestamp) -> DomainResult<Posting> {
        self.post_treasury(owner, &[TreasuryCommand::Deposit { amount }], now)
    }

    pub fn withdraw(&mut self, owner: &AccountId, amount: u64, now: Timestamp) -> DomainResult<Posting> {
        self.post_treasury(owner, &[TreasuryCommand::Withdraw { amount }], now)
    }

    pub fn set_reserve(
        &mut self,
        owner: &AccountId,
        amount: u64,
        now: Timestamp,
    ) -> DomainResult<Posting> {
        self.post_treasury(owner, &[TreasuryCommand::SetReserve { amount }], now)
    }

    // ---- stream operations ----

    pub fn create_stream(&mut self, req: &CreateStream, now: Timestamp) -> DomainResult<Posting> {
        let stream_id = self.next_stream_id;
        let following = stream_id
            .next()
            .ok_or_else(|| DomainError::invalid_state("stream id space exhausted"))?;
        let opened = WageStream::open(
            &OpenStream {
                stream_id,
                employer: req.employer.clone(),
                employee: req.employee.clone(),
                total_amount: req.total_amount,
                duration_seconds: req.duration_seconds,
                description: req.description.clone(),
            },
            now,
        )?;

        let treasury = self.treasury(&req.employer)?;
        let events = vec![StreamEvent::Opened(opened.clone())];
        let (treasury, treasury_events) = stage_treasury(treasury, &funding_for(&events), now)?;

        let stream = WageStream::opened(&opened);
        self.commit(stream, treasury, now);
        self.next_stream_id = following;

        tracing::debug!(%stream_id, employer = %req.employer, amount = req.total_amount, "stream opened");
        Ok(Posting {
            created_stream: Some(stream_id),
            stream_events: events,
            treasury_events,
        })
    }

    pub fn pause_stream(&mut self, id: StreamId, now: Timestamp) -> DomainResult<Posting> {
        self.post_stream(id, StreamCommand::Pause, now)
    }

    pub fn resume_stream(&mut self, id: StreamId, now: Timestamp) -> DomainResult<Posting> {
        self.post_stream(id, StreamCommand::Resume, now)
    }

    pub fn terminate_stream(&mut self, id: StreamId, now: Timestamp) -> DomainResult<Posting> {
        self.post_stream(id, StreamCommand::Terminate, now)
    }

    pub fn withdraw_wages(&mut self, id: StreamId, now: Timestamp) -> DomainResult<Posting> {
        self.post_stream(id, StreamCommand::Withdraw, now)
    }

    pub fn complete_stream(&mut self, id: StreamId, now: Timestamp) -> DomainResult<Posting> {
        self.post_stream(id, StreamCommand::Complete, now)
    }

    pub fn raise_dispute(&mut self, id: StreamId, now: Timestamp) -> DomainResult<Posting> {
        self.post_stream(id, StreamCommand::RaiseDispute, now)
    }

    pub fn resolve_dispute(
        &mut self,
        id: StreamId,
        outcome: DisputeOutcome,
        now: Timestamp,
    ) -> DomainResult<Posting> {
        self.post_stream(id, StreamCommand::ResolveDispute(outcome), now)
    }

    /// Apply a stream command and the treasury movements it implies, or
    /// nothing at all.
    pub fn post_stream(
        &mut self,
        id: StreamId,
        command: StreamCommand,
        now: Timestamp,
    ) -> DomainResult<Posting> {
        let current = self.stream(id)?;
        let events = current.handle(&command, now)?;

        let mut stream = current.clone();
        for e in &events {
            stream.apply(e);
        }

        let treasury = self.treasury(stream.employer())?;
        let (treasury, treasury_events) = stage_treasury(treasury, &funding_for(&events), now)?;

        self.commit(stream, treasury, now);
        Ok(Posting {
            created_stream: None,
            stream_events: events,
            treasury_events,
        })
    }

    fn post_treasury(
        &mut self,
        owner: &AccountId,
        commands: &[TreasuryCommand],
        now: Timestamp,
    ) -> DomainResult<Posting> {
        let (treasury, treasury_events) = stage_treasury(self.treasury(owner)?, commands, now)?;
        if let Err(err) = treasury.check_invariants() {
            fatal(err);
        }
        self.treasuries.insert(owner.clone(), treasury);
        Ok(Posting {
            treasury_events,
            ..Posting::default()
        })
    }

    fn commit(&mut self, stream: WageStream, treasury: EmployerTreasury, now: Timestamp) {
        if let Err(err) = stream
            .check_invariants(now)
            .and_then(|_| treasury.check_invariants())
        {
            fatal(err);
        }
        self.streams.insert(stream.id_typed(), stream);
        self.treasuries.insert(treasury.owner().clone(), treasury);
    }

    // ---- mirror support ----

    /// Replace (or insert) a stream with state refreshed from the external
    /// ledger, after checking it.
    pub fn upsert_stream_record(&mut self, record: &StreamRecord, now: Timestamp) -> DomainResult<()> {
        let stream = WageStream::from_record(record, now)?;
        let id = stream.id_typed();
        let following = id.next().ok_or_else(|| {
            DomainError::desync(format!("{id} leaves no room for later streams"))
        })?;
        self.next_stream_id = self.next_stream_id.max(following);
        self.streams.insert(id, stream);
        Ok(())
    }

    /// Replace (or insert) a treasury with state refreshed from the external
    /// ledger, after checking it.
    pub fn upsert_treasury_record(&mut self, record: &TreasuryRecord) -> DomainResult<()> {
        let treasury = EmployerTreasury::from_record(record)?;
        self.treasuries.insert(treasury.owner().clone(), treasury);
        Ok(())
    }

    /// Put back a stream exactly as it was (rollback of an optimistic change).
    pub fn restore_stream(&mut self, id: StreamId, previous: Option<WageStream>) {
        match previous {
            Some(stream) => {
                // Held records came through `create_stream` or an upsert, so
                // `id` is never the last one.
                if let Some(following) = id.next() {
                    self.next_stream_id = self.next_stream_id.max(following);
                }
                self.streams.insert(id, stream);
            }
            None => {
                self.streams.remove(&id);
            }
        }
    }

    /// Put back a treasury exactly as it was (rollback of an optimistic change).
    pub fn restore_treasury(&mut self, owner: &AccountId, previous: Option<EmployerTreasury>) {
        match previous {
            Some(treasury) => {
                self.treasuries.insert(owner.clone(), treasury);
            }
            None => {
                self.treasuries.remove(owner);
            }
        }
    }

    /// Verify that an employer's allocated balance equals the undisbursed
    /// commitments of its non-terminal streams in this book.
    ///
    /// Only meaningful when the book holds every stream of that employer.
    pub fn reconcile_allocations(&self, owner: &AccountId) -> DomainResult<()> {
        let treasury = self.treasury(owner)?;
        let committed: u64 = self
            .streams_for_employer(owner)
            .map(WageStream::outstanding_commitment)
            .sum();
        if committed != treasury.allocated_balance() {
            return Err(DomainError::desync(format!(
                "treasury {owner}: allocated {} but streams commit {committed}",
                treasury.allocated_balance()
            )));
        }
        Ok(())
    }
}

/// Treasury movements implied by a batch of stream events.
///
/// `allocated_balance` tracks what is still owed to streams, `Σ (deposited −
/// withdrawn)`. A wage payout therefore leaves allocated together with the
/// cash (disburse), and `available_balance` does not move. Settlement pays the
/// owed amount the same way, then releases only the unearned remainder into
/// available, so allocated falls by owed plus unearned in total.
fn funding_for(events: &[StreamEvent]) -> Vec<TreasuryCommand> {
    let mut commands = Vec::new();
    for event in events {
        match event {
            StreamEvent::Opened(e) => commands.push(TreasuryCommand::Allocate {
                amount: e.total_deposited,
            }),
            StreamEvent::Withdrawn(e) => {
                commands.push(TreasuryCommand::Disburse { amount: e.amount })
            }
            StreamEvent::Settled(e) => {
                commands.push(TreasuryCommand::Disburse { amount: e.paid_out });
                commands.push(TreasuryCommand::Release { amount: e.released });
            }
            StreamEvent::Paused(_)
            | StreamEvent::Resumed(_)
            | StreamEvent::DisputeRaised(_)
            | StreamEvent::DisputeReleased(_) => {}
        }
    }
    commands
}

/// Run treasury commands against a scratch copy; the original is untouched.
fn stage_treasury(
    treasury: &EmployerTreasury,
    commands: &[TreasuryCommand],
    now: Timestamp,
) -> DomainResult<(EmployerTreasury, Vec<TreasuryEvent>)> {
    let mut scratch = treasury.clone();
    let mut emitted = Vec::new();
    for cmd in commands {
        let events = scratch.handle(cmd, now)?;
        for e in &events {
            scratch.apply(e);
        }
        emitted.extend(events);
    }
    Ok((scratch, emitted))
}

fn fatal(err: DomainError) -> ! {
    tracing::error!(error = %err, "ledger invariant violated after commit");
    panic!("ledger invariant violated after commit: {err}");
}
