use serde::{Deserialize, Serialize};

use wagestream_core::{
    AccountId, Aggregate, AggregateRoot, DomainError, DomainResult, StreamId, Timestamp,
};
use wagestream_events::Event;

use crate::accrual::{self, AccrualWindow};

/// Lifecycle status of a wage stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Active,
    Paused,
    Completed,
    Terminated,
    Disputed,
}

impl StreamStatus {
    /// Terminal streams hold no commitment in the employer's treasury.
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamStatus::Completed | StreamStatus::Terminated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamStatus::Active => "active",
            StreamStatus::Paused => "paused",
            StreamStatus::Completed => "completed",
            StreamStatus::Terminated => "terminated",
            StreamStatus::Disputed => "disputed",
        }
    }
}

impl core::fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome handed down by the external arbitration process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisputeOutcome {
    /// Return the stream to the status it held before the dispute.
    Release,
    /// Settle the stream as if the employer had terminated it.
    Terminate,
}

/// Aggregate root: WageStream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WageStream {
    id: StreamId,
    employer: AccountId,
    employee: AccountId,
    rate_per_second: u64,
    total_deposited: u64,
    total_withdrawn: u64,
    start_time: Timestamp,
    end_time: Timestamp,
    status: StreamStatus,
    pause_started_at: Option<Timestamp>,
    accumulated_pause_duration: u64,
    disputed_from: Option<StreamStatus>,
    description: String,
    version: u64,
}

impl WageStream {
    /// Validate a request to open a stream and produce its creation event.
    ///
    /// Treasury funding is checked by the caller; this only covers the
    /// stream's own inputs.
    pub fn open(cmd: &OpenStream, now: Timestamp) -> DomainResult<StreamOpened> {
        if cmd.employer == cmd.employee {
            return Err(DomainError::invalid_input(
                "employer and employee must be different accounts",
            ));
        }
        let rate_per_second = accrual::rate_for(cmd.total_amount, cmd.duration_seconds)?;
        let duration = i64::try_from(cmd.duration_seconds)
            .map_err(|_| DomainError::invalid_input("duration too large"))?;
        let end_time = now
            .checked_add(duration)
            .ok_or_else(|| DomainError::invalid_input("end time overflows"))?;

        Ok(StreamOpened {
            stream_id: cmd.stream_id,
            employer: cmd.employer.clone(),
            employee: cmd.employee.clone(),
            rate_per_second,
            total_deposited: cmd.total_amount,
            start_time: now,
            end_time,
            description: cmd.description.trim().to_string(),
        })
    }

    /// Build the aggregate from its creation event.
    pub fn opened(event: &StreamOpened) -> Self {
        Self {
            id: event.stream_id,
            employer: event.employer.clone(),
            employee: event.employee.clone(),
            rate_per_second: event.rate_per_second,
            total_deposited: event.total_deposited,
            total_withdrawn: 0,
            start_time: event.start_time,
            end_time: event.end_time,
            status: StreamStatus::Active,
            pause_started_at: None,
            accumulated_pause_duration: 0,
            disputed_from: None,
            description: event.description.clone(),
            version: 1,
        }
    }

    pub fn id_typed(&self) -> StreamId {
        self.id
    }

    pub fn employer(&self) -> &AccountId {
        &self.employer
    }

    pub fn employee(&self) -> &AccountId {
        &self.employee
    }

    pub fn rate_per_second(&self) -> u64 {
        self.rate_per_second
    }

    pub fn total_deposited(&self) -> u64 {
        self.total_deposited
    }

    pub fn total_withdrawn(&self) -> u64 {
        self.total_withdrawn
    }

    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    pub fn end_time(&self) -> Timestamp {
        self.end_time
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    pub fn pause_started_at(&self) -> Option<Timestamp> {
        self.pause_started_at
    }

    pub fn accumulated_pause_duration(&self) -> u64 {
        self.accumulated_pause_duration
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    fn window(&self) -> AccrualWindow {
        AccrualWindow {
            start_time: self.start_time,
            end_time: self.end_time,
            accumulated_pause: self.accumulated_pause_duration,
            open_pause_since: self.pause_started_at,
        }
    }

    /// Amount earned as of `now`.
    ///
    /// Settled streams are frozen at what they paid out.
    pub fn earned(&self, now: Timestamp) -> u64 {
        if self.status.is_terminal() {
            return self.total_withdrawn;
        }
        let elapsed = self.window().effective_elapsed(now);
        accrual::accrue(self.rate_per_second, elapsed).min(self.total_deposited)
    }

    /// Earned but not yet paid.
    pub fn withdrawable(&self, now: Timestamp) -> u64 {
        self.earned(now).saturating_sub(self.total_withdrawn)
    }

    /// Part of the deposit that has not been earned (and never will be if the
    /// stream is settled now).
    pub fn unearned(&self, now: Timestamp) -> u64 {
        self.total_deposited.saturating_sub(self.earned(now))
    }

    /// What this stream still holds in its employer's allocated balance.
    pub fn outstanding_commitment(&self) -> u64 {
        if self.status.is_terminal() {
            0
        } else {
            self.total_deposited.saturating_sub(self.total_withdrawn)
        }
    }

    pub fn has_ended(&self, now: Timestamp) -> bool {
        now >= self.end_time
    }

    /// Whether the status permits the employee to withdraw at `now`.
    pub fn can_withdraw(&self, now: Timestamp) -> bool {
        match self.status {
            StreamStatus::Active | StreamStatus::Completed => true,
            // What was earned before the pause stays claimable once the
            // schedule is over.
            StreamStatus::Paused => self.has_ended(now),
            StreamStatus::Terminated | StreamStatus::Disputed => false,
        }
    }

    /// Check the per-stream accounting invariants as of `now`.
    pub fn check_invariants(&self, now: Timestamp) -> DomainResult<()> {
        if self.end_time <= self.start_time {
            return Err(DomainError::desync(format!(
                "{}: end_time {} is not after start_time {}",
                self.id, self.end_time, self.start_time
            )));
        }
        if self.total_withdrawn > self.total_deposited {
            return Err(DomainError::desync(format!(
                "{}: withdrawn {} exceeds deposited {}",
                self.id, self.total_withdrawn, self.total_deposited
            )));
        }
        let earned = self.earned(now);
        if self.total_withdrawn > earned {
            return Err(DomainError::desync(format!(
                "{}: withdrawn {} exceeds earned {earned}",
                self.id, self.total_withdrawn
            )));
        }
        let pause_consistent = match self.status {
            StreamStatus::Paused => self.pause_started_at.is_some(),
            StreamStatus::Active => self.pause_started_at.is_none(),
            StreamStatus::Disputed => true,
            StreamStatus::Completed | StreamStatus::Terminated => self.pause_started_at.is_none(),
        };
        if !pause_consistent {
            return Err(DomainError::desync(format!(
                "{}: pause marker inconsistent with status {}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Snapshot in the external ledger's record shape.
    pub fn to_record(&self) -> StreamRecord {
        StreamRecord {
            stream_id: self.id,
            employer: self.employer.clone(),
            employee: self.employee.clone(),
            rate_per_second: self.rate_per_second,
            total_deposited: self.total_deposited,
            total_withdrawn: self.total_withdrawn,
            start_time: self.start_time,
            end_time: self.end_time,
            status: self.status,
            pause_started_at: self.pause_started_at,
            accumulated_pause_duration: self.accumulated_pause_duration,
            disputed_from: self.disputed_from,
            description: self.description.clone(),
        }
    }

    /// Rebuild a stream from an external ledger record, checking invariants
    /// as of `now`.
    pub fn from_record(record: &StreamRecord, now: Timestamp) -> DomainResult<Self> {
        let stream = Self {
            id: record.stream_id,
            employer: record.employer.clone(),
            employee: record.employee.clone(),
            rate_per_second: record.rate_per_second,
            total_deposited: record.total_deposited,
            total_withdrawn: record.total_withdrawn,
            start_time: record.start_time,
            end_time: record.end_time,
            status: record.status,
            pause_started_at: record.pause_started_at,
            accumulated_pause_duration: record.accumulated_pause_duration,
            disputed_from: record.disputed_from,
            description: record.description.clone(),
            version: 0,
        };
        stream.check_invariants(now)?;
        Ok(stream)
    }
}

impl AggregateRoot for WageStream {
    type Id = StreamId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Wire shape of a stream as reported by the external ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub stream_id: StreamId,
    pub employer: AccountId,
    pub employee: AccountId,
    pub rate_per_second: u64,
    pub total_deposited: u64,
    pub total_withdrawn: u64,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub status: StreamStatus,
    pub pause_started_at: Option<Timestamp>,
    pub accumulated_pause_duration: u64,
    #[serde(default)]
    pub disputed_from: Option<StreamStatus>,
    #[serde(default)]
    pub description: String,
}

/// Command: OpenStream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenStream {
    pub stream_id: StreamId,
    pub employer: AccountId,
    pub employee: AccountId,
    pub total_amount: u64,
    pub duration_seconds: u64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamCommand {
    Pause,
    Resume,
    Withdraw,
    Terminate,
    Complete,
    RaiseDispute,
    ResolveDispute(DisputeOutcome),
}

/// Event: StreamOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOpened {
    pub stream_id: StreamId,
    pub employer: AccountId,
    pub employee: AccountId,
    pub rate_per_second: u64,
    pub total_deposited: u64,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub description: String,
}

/// Event: StreamPaused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPaused {
    pub stream_id: StreamId,
    pub at: Timestamp,
}

/// Event: StreamResumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamResumed {
    pub stream_id: StreamId,
    pub at: Timestamp,
    pub paused_for: u64,
}

/// Event: WagesWithdrawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WagesWithdrawn {
    pub stream_id: StreamId,
    pub amount: u64,
    pub at: Timestamp,
}

/// Event: StreamSettled.
///
/// Final settlement: `paid_out` goes to the employee, `released` returns to the
/// employer's available balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettled {
    pub stream_id: StreamId,
    pub at: Timestamp,
    pub paid_out: u64,
    pub released: u64,
    pub final_status: StreamStatus,
}

/// Event: DisputeRaised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeRaised {
    pub stream_id: StreamId,
    pub at: Timestamp,
    pub previous: StreamStatus,
}

/// Event: DisputeReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeReleased {
    pub stream_id: StreamId,
    pub at: Timestamp,
    pub restored: StreamStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamEvent {
    Opened(StreamOpened),
    Paused(StreamPaused),
    Resumed(StreamResumed),
    Withdrawn(WagesWithdrawn),
    Settled(StreamSettled),
    DisputeRaised(DisputeRaised),
    DisputeReleased(DisputeReleased),
}

impl StreamEvent {
    pub fn stream_id(&self) -> StreamId {
        match self {
            StreamEvent::Opened(e) => e.stream_id,
            StreamEvent::Paused(e) => e.stream_id,
            StreamEvent::Resumed(e) => e.stream_id,
            StreamEvent::Withdrawn(e) => e.stream_id,
            StreamEvent::Settled(e) => e.stream_id,
            StreamEvent::DisputeRaised(e) => e.stream_id,
            StreamEvent::DisputeReleased(e) => e.stream_id,
        }
    }
}

impl Event for StreamEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::Opened(_) => "streams.stream.opened",
            StreamEvent::Paused(_) => "streams.stream.paused",
            StreamEvent::Resumed(_) => "streams.stream.resumed",
            StreamEvent::Withdrawn(_) => "streams.stream.wages_withdrawn",
            StreamEvent::Settled(_) => "streams.stream.settled",
            StreamEvent::DisputeRaised(_) => "streams.stream.dispute_raised",
            StreamEvent::DisputeReleased(_) => "streams.stream.dispute_released",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> Timestamp {
        match self {
            StreamEvent::Opened(e) => e.start_time,
            StreamEvent::Paused(e) => e.at,
            StreamEvent::Resumed(e) => e.at,
            StreamEvent::Withdrawn(e) => e.at,
            StreamEvent::Settled(e) => e.at,
            StreamEvent::DisputeRaised(e) => e.at,
            StreamEvent::DisputeReleased(e) => e.at,
        }
    }
}

impl Aggregate for WageStream {
    type Command = StreamCommand;
    type Event = StreamEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StreamEvent::Opened(e) => {
                *self = WageStream::opened(e);
                return;
            }
            StreamEvent::Paused(e) => {
                self.status = StreamStatus::Paused;
                self.pause_started_at = Some(e.at);
            }
            StreamEvent::Resumed(e) => {
                self.status = StreamStatus::Active;
                self.pause_started_at = None;
                self.accumulated_pause_duration += e.paused_for;
            }
            StreamEvent::Withdrawn(e) => {
                self.total_withdrawn += e.amount;
            }
            StreamEvent::Settled(e) => {
                // The open pause, if any, is folded in so the record stays
                // consistent with a terminal status.
                if let Some(since) = self.pause_started_at.take() {
                    self.accumulated_pause_duration += self.window().pause_length(since, e.at);
                }
                self.total_withdrawn += e.paid_out;
                self.status = e.final_status;
                self.disputed_from = None;
            }
            StreamEvent::DisputeRaised(e) => {
                self.disputed_from = Some(e.previous);
                self.status = StreamStatus::Disputed;
            }
            StreamEvent::DisputeReleased(e) => {
                self.disputed_from = None;
                self.status = e.restored;
            }
        }

        self.version += 1;
    }

    fn handle(
        &self,
        command: &Self::Command,
        now: Timestamp,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StreamCommand::Pause => self.handle_pause(now),
            StreamCommand::Resume => self.handle_resume(now),
            StreamCommand::Withdraw => self.handle_withdraw(now),
            StreamCommand::Terminate => self.handle_terminate(now),
            StreamCommand::Complete => self.handle_complete(now),
            StreamCommand::RaiseDispute => self.handle_raise_dispute(now),
            StreamCommand::ResolveDispute(outcome) => self.handle_resolve_dispute(*outcome, now),
        }
    }
}

impl WageStream {
    fn reject(&self, action: &str) -> DomainError {
        DomainError::invalid_state(format!("cannot {action} {} while {}", self.id, self.status))
    }

    fn handle_pause(&self, now: Timestamp) -> DomainResult<Vec<StreamEvent>> {
        if self.status != StreamStatus::Active {
            return Err(self.reject("pause"));
        }
        Ok(vec![StreamEvent::Paused(StreamPaused {
            stream_id: self.id,
            at: now,
        })])
    }

    fn handle_resume(&self, now: Timestamp) -> DomainResult<Vec<StreamEvent>> {
        let since = match (self.status, self.pause_started_at) {
            (StreamStatus::Paused, Some(since)) => since,
            _ => return Err(self.reject("resume")),
        };
        Ok(vec![StreamEvent::Resumed(StreamResumed {
            stream_id: self.id,
            at: now,
            paused_for: self.window().pause_length(since, now),
        })])
    }

    fn handle_withdraw(&self, now: Timestamp) -> DomainResult<Vec<StreamEvent>> {
        if !self.can_withdraw(now) {
            return Err(self.reject("withdraw from"));
        }

        let amount = self.withdrawable(now);
        if amount == 0 {
            return Err(DomainError::NothingToWithdraw);
        }

        let mut events = vec![StreamEvent::Withdrawn(WagesWithdrawn {
            stream_id: self.id,
            amount,
            at: now,
        })];

        // Past end_time the stream is fully withdrawn after this payout.
        if self.has_ended(now) && !self.status.is_terminal() {
            events.push(StreamEvent::Settled(StreamSettled {
                stream_id: self.id,
                at: now,
                paid_out: 0,
                released: self.unearned(now),
                final_status: StreamStatus::Completed,
            }));
        }
        Ok(events)
    }

    fn settle(&self, now: Timestamp) -> StreamEvent {
        let final_status = if self.has_ended(now) {
            StreamStatus::Completed
        } else {
            StreamStatus::Terminated
        };
        StreamEvent::Settled(StreamSettled {
            stream_id: self.id,
            at: now,
            paid_out: self.withdrawable(now),
            released: self.unearned(now),
            final_status,
        })
    }

    fn handle_terminate(&self, now: Timestamp) -> DomainResult<Vec<StreamEvent>> {
        match self.status {
            StreamStatus::Active | StreamStatus::Paused => Ok(vec![self.settle(now)]),
            _ => Err(self.reject("terminate")),
        }
    }

    fn handle_complete(&self, now: Timestamp) -> DomainResult<Vec<StreamEvent>> {
        match self.status {
            StreamStatus::Active | StreamStatus::Paused if self.has_ended(now) => {
                Ok(vec![self.settle(now)])
            }
            StreamStatus::Active | StreamStatus::Paused => Err(DomainError::invalid_state(
                format!("{} has not reached its end time", self.id),
            )),
            _ => Err(self.reject("complete")),
        }
    }

    fn handle_raise_dispute(&self, now: Timestamp) -> DomainResult<Vec<StreamEvent>> {
        match self.status {
            StreamStatus::Active | StreamStatus::Paused => {
                Ok(vec![StreamEvent::DisputeRaised(DisputeRaised {
                    stream_id: self.id,
                    at: now,
                    previous: self.status,
                })])
            }
            _ => Err(self.reject("dispute")),
        }
    }

    fn handle_resolve_dispute(
        &self,
        outcome: DisputeOutcome,
        now: Timestamp,
    ) -> DomainResult<Vec<StreamEvent>> {
        if self.status != StreamStatus::Disputed {
            return Err(self.reject("resolve a dispute on"));
        }
        match outcome {
            DisputeOutcome::Release => {
                let restored = self.disputed_from.ok_or_else(|| {
                    DomainError::desync(format!("{} is disputed without a prior status", self.id))
                })?;
                Ok(vec![StreamEvent::DisputeReleased(DisputeReleased {
                    stream_id: self.id,
                    at: now,
                    restored,
                })])
            }
            DisputeOutcome::Terminate => Ok(vec![self.settle(now)]),
        }
    }
}
