//! Client-side mirror of the external ledger.
//!
//! ## Mutation flow
//!
//! ```text
//! mutation(session, ...)
//!   ↓
//! 1. refuse halted records; re-read unconfirmed ones
//!   ↓
//! 2. authorize + validate on a clone of the snapshot   (no IO; may reject)
//!   ↓
//! 3. publish the affected records optimistically
//!   ↓
//! 4. submit to the ledger under `submit_timeout`
//!   ↓
//! 5a. confirmed  → re-read the affected records from the ledger
//! 5b. refused    → put the affected records back as they were
//! 5c. timed out  → put them back and mark them unconfirmed
//! ```
//!
//! Writes are serialized; reads and refreshes run concurrently with them.
//! Published state is an immutable `Arc<PayrollBook>` replaced wholesale,
//! so a reader always sees a complete book.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use wagestream_accounting::{AccountingView, EmployeeDashboard, EmployerDashboard};
use wagestream_core::{
    AccountId, Clock, DomainError, DomainResult, Session, StreamId, Timestamp,
};
use wagestream_ledger::{CreateStream, PayrollBook, Posting};
use wagestream_streams::{StreamRecord, WageStream};
use wagestream_treasury::EmployerTreasury;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::journal::Journal;
use crate::ledger::{Confirmation, ExternalLedger, LedgerError, LedgerResult};
use crate::pending::{PendingMutations, RecordKey};
use crate::retry::ReadRetry;

/// Parameters of a stream the session's employer wants to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStream {
    pub employee: AccountId,
    pub total_amount: u64,
    pub duration_seconds: u64,
    pub description: String,
}

pub struct LedgerMirror<L, C> {
    ledger: Arc<L>,
    clock: C,
    config: ClientConfig,
    view: AccountingView,
    retry: ReadRetry,
    snapshot: RwLock<Arc<PayrollBook>>,
    /// Serializes snapshot replacement so concurrent updates are not lost.
    staging: Mutex<()>,
    writes: tokio::sync::Mutex<()>,
    unconfirmed: Mutex<BTreeSet<RecordKey>>,
    halted: Mutex<BTreeMap<RecordKey, String>>,
    pending: PendingMutations,
    journal: Journal,
}

impl<L, C> LedgerMirror<L, C>
where
    L: ExternalLedger,
    C: Clock,
{
    pub fn new(ledger: Arc<L>, clock: C, config: ClientConfig) -> Self {
        Self {
            ledger,
            clock,
            view: AccountingView::new(config.thresholds),
            retry: ReadRetry::new(config.read_retries, config.read_backoff),
            config,
            snapshot: RwLock::new(Arc::new(PayrollBook::new())),
            staging: Mutex::new(()),
            writes: tokio::sync::Mutex::new(()),
            unconfirmed: Mutex::new(BTreeSet::new()),
            halted: Mutex::new(BTreeMap::new()),
            pending: PendingMutations::new(),
            journal: Journal::new(),
        }
    }

    // ---- state ----

    /// The current published book.
    pub fn snapshot(&self) -> Arc<PayrollBook> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn stream(&self, id: StreamId) -> ClientResult<WageStream> {
        Ok(self.snapshot().stream(id)?.clone())
    }

    pub fn treasury(&self, owner: &AccountId) -> ClientResult<EmployerTreasury> {
        Ok(self.snapshot().treasury(owner)?.clone())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pending(&self) -> &PendingMutations {
        &self.pending
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn is_unconfirmed(&self, key: &RecordKey) -> bool {
        lock(&self.unconfirmed).contains(key)
    }

    pub fn is_halted(&self, key: &RecordKey) -> bool {
        lock(&self.halted).contains_key(key)
    }

    /// Halted records with the reason each was halted.
    pub fn halted(&self) -> Vec<(RecordKey, String)> {
        lock(&self.halted)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    // ---- dashboards ----

    pub fn employee_dashboard(&self, session: &Session) -> ClientResult<EmployeeDashboard> {
        session.require_employee(session.account())?;
        let book = self.snapshot();
        Ok(self
            .view
            .employee_dashboard(session.account(), book.streams(), self.clock.now()))
    }

    pub fn employer_dashboard(&self, session: &Session) -> ClientResult<EmployerDashboard> {
        session.require_employer(session.account())?;
        let book = self.snapshot();
        let treasury = book.treasury(session.account())?;
        Ok(self
            .view
            .employer_dashboard(treasury, book.streams(), self.clock.now()))
    }

    // ---- reads ----

    /// Pull every stream `account` is party to, its treasury if it has one,
    /// and the treasuries funding those streams.
    pub async fn load_account(&self, account: &AccountId) -> ClientResult<()> {
        let streams = self.read(|| self.ledger.list_streams(account)).await?;
        self.install_streams(&streams)?;

        let mut owners: BTreeSet<AccountId> =
            streams.iter().map(|s| s.employer.clone()).collect();
        owners.insert(account.clone());
        for owner in &owners {
            self.refresh_treasury(owner).await?;
        }
        tracing::debug!(%account, streams = streams.len(), "account loaded");
        Ok(())
    }

    /// Re-read one stream from the ledger.
    pub async fn refresh_stream(&self, id: StreamId) -> ClientResult<()> {
        let key = RecordKey::Stream(id);
        match self.read(|| self.ledger.fetch_stream(id)).await {
            Ok(record) => self.install_streams(std::slice::from_ref(&record))?,
            Err(LedgerError::NotFound(_)) => self.publish(|book| book.restore_stream(id, None)),
            Err(err) => return Err(err.into()),
        }
        self.clear_unconfirmed(&key);
        Ok(())
    }

    /// Re-read a treasury together with every stream it funds, then check
    /// that its allocation matches those streams.
    pub async fn refresh_treasury(&self, owner: &AccountId) -> ClientResult<()> {
        let key = RecordKey::Treasury(owner.clone());
        let record = match self.read(|| self.ledger.fetch_treasury(owner)).await {
            Ok(record) => Some(record),
            Err(LedgerError::NotFound(_)) => None,
            Err(err) => return Err(err.into()),
        };

        match record {
            None => self.publish(|book| book.restore_treasury(owner, None)),
            Some(record) => {
                let streams: Vec<StreamRecord> = self
                    .read(|| self.ledger.list_streams(owner))
                    .await?
                    .into_iter()
                    .filter(|s| &s.employer == owner)
                    .collect();
                self.install_streams(&streams)?;

                let installed = self.try_publish(|book| {
                    book.upsert_treasury_record(&record)?;
                    book.reconcile_allocations(owner)
                });
                if let Err(err) = installed {
                    self.halt(&key, &err);
                    return Err(err.into());
                }
            }
        }
        self.clear_unconfirmed(&key);
        Ok(())
    }

    /// Clear a halted record by re-reading it from the ledger.
    ///
    /// The record stays halted if the fresh copy still fails its checks.
    pub async fn resync(&self, key: &RecordKey) -> ClientResult<()> {
        let previous = lock(&self.halted).remove(key);
        let result = self.refresh(key).await;
        match &result {
            Ok(()) => tracing::info!(record = %key, "record resynchronized"),
            Err(ClientError::Domain(DomainError::LedgerDesync(_))) => {}
            Err(err) => {
                if let Some(reason) = previous {
                    lock(&self.halted).insert(key.clone(), reason);
                }
                tracing::warn!(record = %key, error = %err, "resync could not reach the ledger");
            }
        }
        result
    }

    async fn refresh(&self, key: &RecordKey) -> ClientResult<()> {
        match key {
            RecordKey::Stream(id) => self.refresh_stream(*id).await,
            RecordKey::Treasury(owner) => self.refresh_treasury(owner).await,
        }
    }

    async fn read<T, F, Fut>(&self, read: F) -> LedgerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LedgerResult<T>>,
    {
        self.retry.run("ledger read", read).await
    }

    /// Validate and install refreshed stream records. Halted streams are left
    /// alone; records that fail their checks halt their stream. A stream read
    /// back successfully is no longer unconfirmed.
    fn install_streams(&self, records: &[StreamRecord]) -> ClientResult<()> {
        let now = self.clock.now();
        let halted: BTreeSet<RecordKey> = lock(&self.halted).keys().cloned().collect();

        let failures: Vec<(StreamId, DomainError)> = self.publish(|book| {
            records
                .iter()
                .filter(|r| !halted.contains(&RecordKey::Stream(r.stream_id)))
                .filter_map(|r| {
                    book.upsert_stream_record(r, now)
                        .err()
                        .map(|err| (r.stream_id, err))
                })
                .collect()
        });

        {
            let mut unconfirmed = lock(&self.unconfirmed);
            for record in records {
                let key = RecordKey::Stream(record.stream_id);
                let failed = failures.iter().any(|(id, _)| *id == record.stream_id);
                if !failed && !halted.contains(&key) {
                    unconfirmed.remove(&key);
                }
            }
        }
        for (id, err) in &failures {
            self.halt(&RecordKey::Stream(*id), err);
        }
        match failures.into_iter().next() {
            Some((_, err)) => Err(err.into()),
            None => Ok(()),
        }
    }

    // ---- treasury mutations ----

    pub async fn initialize_treasury(
        &self,
        session: &Session,
        initial_deposit: u64,
    ) -> ClientResult<Confirmation> {
        let owner = session.account().clone();
        self.mutate(
            "initialize_treasury",
            RecordKey::Treasury(owner.clone()),
            |book, now| {
                session.require_employer(&owner)?;
                book.initialize_treasury(owner.clone(), initial_deposit, now)
            },
            self.ledger.initialize_treasury(&owner, initial_deposit),
        )
        .await
    }

    pub async fn deposit(&self, session: &Session, amount: u64) -> ClientResult<Confirmation> {
        let owner = session.account();
        self.mutate(
            "deposit",
            RecordKey::Treasury(owner.clone()),
            |book, now| {
                session.require_employer(owner)?;
                book.deposit(owner, amount, now)
            },
            self.ledger.deposit(owner, amount),
        )
        .await
    }

    pub async fn withdraw(&self, session: &Session, amount: u64) -> ClientResult<Confirmation> {
        let owner = session.account();
        self.mutate(
            "withdraw",
            RecordKey::Treasury(owner.clone()),
            |book, now| {
                session.require_employer(owner)?;
                book.withdraw(owner, amount, now)
            },
            self.ledger.withdraw(owner, amount),
        )
        .await
    }

    pub async fn set_reserve(&self, session: &Session, amount: u64) -> ClientResult<Confirmation> {
        let owner = session.account();
        self.mutate(
            "set_reserve",
            RecordKey::Treasury(owner.clone()),
            |book, now| {
                session.require_employer(owner)?;
                book.set_reserve(owner, amount, now)
            },
            self.ledger.set_reserve(owner, amount),
        )
        .await
    }

    // ---- stream mutations ----

    pub async fn create_stream(
        &self,
        session: &Session,
        stream: NewStream,
    ) -> ClientResult<Confirmation> {
        let request = CreateStream {
            employer: session.account().clone(),
            employee: stream.employee,
            total_amount: stream.total_amount,
            duration_seconds: stream.duration_seconds,
            description: stream.description,
        };
        self.mutate(
            "create_stream",
            RecordKey::Treasury(request.employer.clone()),
            |book, now| {
                session.require_employer(&request.employer)?;
                book.create_stream(&request, now)
            },
            self.ledger.create_stream(&request),
        )
        .await
    }

    pub async fn pause_stream(&self, session: &Session, id: StreamId) -> ClientResult<Confirmation> {
        self.mutate(
            "pause_stream",
            RecordKey::Stream(id),
            |book, now| {
                session.require_employer(book.stream(id)?.employer())?;
                book.pause_stream(id, now)
            },
            self.ledger.pause_stream(id),
        )
        .await
    }

    pub async fn resume_stream(&self, session: &Session, id: StreamId) -> ClientResult<Confirmation> {
        self.mutate(
            "resume_stream",
            RecordKey::Stream(id),
            |book, now| {
                session.require_employer(book.stream(id)?.employer())?;
                book.resume_stream(id, now)
            },
            self.ledger.resume_stream(id),
        )
        .await
    }

    pub async fn terminate_stream(
        &self,
        session: &Session,
        id: StreamId,
    ) -> ClientResult<Confirmation> {
        self.mutate(
            "terminate_stream",
            RecordKey::Stream(id),
            |book, now| {
                session.require_employer(book.stream(id)?.employer())?;
                book.terminate_stream(id, now)
            },
            self.ledger.terminate_stream(id),
        )
        .await
    }

    pub async fn complete_stream(
        &self,
        session: &Session,
        id: StreamId,
    ) -> ClientResult<Confirmation> {
        self.mutate(
            "complete_stream",
            RecordKey::Stream(id),
            |book, now| {
                session.require_employer(book.stream(id)?.employer())?;
                book.complete_stream(id, now)
            },
            self.ledger.complete_stream(id),
        )
        .await
    }

    pub async fn withdraw_wages(
        &self,
        session: &Session,
        id: StreamId,
    ) -> ClientResult<Confirmation> {
        self.mutate(
            "withdraw_wages",
            RecordKey::Stream(id),
            |book, now| {
                session.require_employee(book.stream(id)?.employee())?;
                book.withdraw_wages(id, now)
            },
            self.ledger.withdraw_wages(id),
        )
        .await
    }

    /// Either party to a stream may raise a dispute.
    pub async fn raise_dispute(&self, session: &Session, id: StreamId) -> ClientResult<Confirmation> {
        self.mutate(
            "raise_dispute",
            RecordKey::Stream(id),
            |book, now| {
                let stream = book.stream(id)?;
                session
                    .require_employer(stream.employer())
                    .or_else(|_| session.require_employee(stream.employee()))?;
                book.raise_dispute(id, now)
            },
            self.ledger.raise_dispute(id),
        )
        .await
    }

    // ---- mutation machinery ----

    async fn mutate<S, Fut>(
        &self,
        operation: &'static str,
        target: RecordKey,
        stage: S,
        submit: Fut,
    ) -> ClientResult<Confirmation>
    where
        S: FnOnce(&mut PayrollBook, Timestamp) -> DomainResult<Posting>,
        Fut: Future<Output = LedgerResult<Confirmation>>,
    {
        let _writer = self.writes.lock().await;

        // A refreshed stream can reveal its treasury, so settle twice at most.
        for _ in 0..2 {
            let related = self.related_keys(&target);
            self.ensure_not_halted(&related)?;
            if !self.refresh_unconfirmed(&related).await? {
                break;
            }
        }

        let now = self.clock.now();
        let before = self.snapshot();
        let mut staged = (*before).clone();
        let posting = stage(&mut staged, now).inspect_err(|err| {
            tracing::debug!(operation, error = %err, "mutation refused locally");
        })?;

        let mut affected = affected_keys(&posting);
        affected.insert(target);
        let affected: Vec<RecordKey> = affected.into_iter().collect();
        self.ensure_not_halted(&affected)?;

        let previous = RecordCopies::capture(&before, &affected);
        let optimistic = RecordCopies::capture(&staged, &affected);
        self.publish(|book| optimistic.write_into(book));

        let mutation = self.pending.submit(operation, affected.clone());
        match tokio::time::timeout(self.config.submit_timeout, submit).await {
            Ok(Ok(confirmation)) => {
                self.pending.mark_confirmed(mutation, confirmation.token);
                self.journal.record(&posting, confirmation.token);
                tracing::info!(
                    operation,
                    token = %confirmation.token,
                    records = affected.len(),
                    "mutation confirmed"
                );
                self.settle_confirmed(&posting, &confirmation, affected).await?;
                Ok(confirmation)
            }
            Ok(Err(err)) => {
                self.publish(|book| previous.write_into(book));
                if err.is_transient() {
                    self.mark_unconfirmed(&affected);
                    self.pending.mark_unconfirmed(mutation, err.to_string());
                } else {
                    self.pending.mark_rejected(mutation, err.to_string());
                }
                tracing::warn!(operation, error = %err, "ledger refused mutation; rolled back");
                Err(err.into())
            }
            Err(_) => {
                self.publish(|book| previous.write_into(book));
                self.mark_unconfirmed(&affected);
                self.pending
                    .mark_unconfirmed(mutation, "confirmation timed out".to_string());
                tracing::warn!(
                    operation,
                    timeout_ms = self.config.submit_timeout.as_millis() as u64,
                    "no confirmation; rolled back and marked unconfirmed"
                );
                Err(ClientError::Timeout(self.config.submit_timeout))
            }
        }
    }

    /// Replace the optimistic records with the ledger's copies.
    ///
    /// The write already landed, so a failed read leaves the records marked
    /// unconfirmed rather than failing the call; a failed check does fail it.
    async fn settle_confirmed(
        &self,
        posting: &Posting,
        confirmation: &Confirmation,
        mut affected: Vec<RecordKey>,
    ) -> ClientResult<()> {
        if let (Some(local), Some(assigned)) = (posting.created_stream, confirmation.stream_id) {
            if local != assigned {
                tracing::debug!(%local, %assigned, "ledger assigned a different stream id");
                self.publish(|book| book.restore_stream(local, None));
                affected.retain(|k| k != &RecordKey::Stream(local));
                affected.push(RecordKey::Stream(assigned));
            }
        }

        // Streams before treasuries: the treasury check reads the streams.
        affected.sort_by_key(|k| matches!(k, RecordKey::Treasury(_)));
        for key in &affected {
            match self.refresh(key).await {
                Ok(()) => {}
                Err(ClientError::Transient(reason)) => {
                    tracing::warn!(record = %key, %reason, "confirmed but not re-read");
                    self.mark_unconfirmed(std::slice::from_ref(key));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// The target plus its treasury when the target is a known stream.
    fn related_keys(&self, target: &RecordKey) -> Vec<RecordKey> {
        let mut keys = vec![target.clone()];
        if let RecordKey::Stream(id) = target {
            if let Ok(stream) = self.snapshot().stream(*id) {
                keys.push(RecordKey::Treasury(stream.employer().clone()));
            }
        }
        keys
    }

    fn ensure_not_halted(&self, keys: &[RecordKey]) -> ClientResult<()> {
        let halted = lock(&self.halted);
        match keys.iter().find(|k| halted.contains_key(k)) {
            Some(key) => Err(ClientError::Halted(key.to_string())),
            None => Ok(()),
        }
    }

    /// Re-read whichever of `keys` are unconfirmed. Returns whether any were.
    async fn refresh_unconfirmed(&self, keys: &[RecordKey]) -> ClientResult<bool> {
        let stale: Vec<RecordKey> = {
            let unconfirmed = lock(&self.unconfirmed);
            keys.iter()
                .filter(|k| unconfirmed.contains(k))
                .cloned()
                .collect()
        };
        for key in &stale {
            tracing::info!(record = %key, "re-reading unconfirmed record before mutating");
            self.refresh(key).await?;
        }
        Ok(!stale.is_empty())
    }

    fn mark_unconfirmed(&self, keys: &[RecordKey]) {
        lock(&self.unconfirmed).extend(keys.iter().cloned());
    }

    fn clear_unconfirmed(&self, key: &RecordKey) {
        lock(&self.unconfirmed).remove(key);
    }

    fn halt(&self, key: &RecordKey, err: &DomainError) {
        tracing::error!(record = %key, error = %err, "record halted until resync");
        lock(&self.halted).insert(key.clone(), err.to_string());
    }

    // ---- snapshot replacement ----

    fn publish<R>(&self, update: impl FnOnce(&mut PayrollBook) -> R) -> R {
        let _staging = lock(&self.staging);
        let mut next = (*self.snapshot()).clone();
        let out = update(&mut next);
        self.swap(next);
        out
    }

    /// Like `publish`, but keeps the current snapshot if `update` fails.
    fn try_publish<R>(
        &self,
        update: impl FnOnce(&mut PayrollBook) -> DomainResult<R>,
    ) -> DomainResult<R> {
        let _staging = lock(&self.staging);
        let mut next = (*self.snapshot()).clone();
        let out = update(&mut next)?;
        self.swap(next);
        Ok(out)
    }

    fn swap(&self, next: PayrollBook) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }
}

/// Records a posting touched.
fn affected_keys(posting: &Posting) -> BTreeSet<RecordKey> {
    posting
        .stream_events
        .iter()
        .map(|e| RecordKey::Stream(e.stream_id()))
        .chain(
            posting
                .treasury_events
                .iter()
                .map(|e| RecordKey::Treasury(e.owner().clone())),
        )
        .collect()
}

/// Copies of specific records, for moving them between books.
#[derive(Debug, Default)]
struct RecordCopies {
    streams: Vec<(StreamId, Option<WageStream>)>,
    treasuries: Vec<(AccountId, Option<EmployerTreasury>)>,
}

impl RecordCopies {
    fn capture(book: &PayrollBook, keys: &[RecordKey]) -> Self {
        let mut copies = Self::default();
        for key in keys {
            match key {
                RecordKey::Stream(id) => copies
                    .streams
                    .push((*id, book.stream(*id).ok().cloned())),
                RecordKey::Treasury(owner) => copies
                    .treasuries
                    .push((owner.clone(), book.treasury(owner).ok().cloned())),
            }
        }
        copies
    }

    fn write_into(&self, book: &mut PayrollBook) {
        for (id, stream) in &self.streams {
            book.restore_stream(*id, stream.clone());
        }
        for (owner, treasury) in &self.treasuries {
            book.restore_treasury(owner, treasury.clone());
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
