use std::sync::Arc;
use std::time::Duration;

use wagestream_client::{
    ClientConfig, ClientError, ExternalLedger, InMemoryLedger, LedgerMirror, MutationStatus,
    NewStream, RecordKey, WriteFault,
};
use wagestream_core::{
    AccountId, Clock, DomainError, ManualClock, SECONDS_PER_DAY, Session, StreamId,
};
use wagestream_ledger::CreateStream;
use wagestream_streams::{DisputeOutcome, StreamStatus};
use wagestream_treasury::HealthThresholds;

const T0: i64 = 1_700_000_000;
const DAY: u64 = SECONDS_PER_DAY;

struct Harness {
    clock: ManualClock,
    ledger: Arc<InMemoryLedger<ManualClock>>,
    mirror: LedgerMirror<InMemoryLedger<ManualClock>, ManualClock>,
    employer: Session,
    employee: Session,
}

fn acct(s: &str) -> AccountId {
    AccountId::parse(s).unwrap()
}

fn config() -> ClientConfig {
    ClientConfig {
        submit_timeout: Duration::from_millis(50),
        read_retries: 3,
        read_backoff: Duration::from_millis(1),
        thresholds: HealthThresholds::default(),
    }
}

fn harness() -> Harness {
    wagestream_observability::init_for_tests();
    let clock = ManualClock::new(T0);
    let ledger = Arc::new(InMemoryLedger::new(clock.clone()));
    let mirror = LedgerMirror::new(Arc::clone(&ledger), clock.clone(), config());
    Harness {
        clock,
        ledger,
        mirror,
        employer: Session::employer(acct("acme")),
        employee: Session::employee(acct("alice")),
    }
}

fn ten_day_stream(amount: u64) -> NewStream {
    NewStream {
        employee: acct("alice"),
        total_amount: amount,
        duration_seconds: 10 * DAY,
        description: "engineering".to_string(),
    }
}

/// Treasury of 10_000 with one 8_640 / 10 day stream for alice.
async fn funded(h: &Harness) -> StreamId {
    h.mirror.initialize_treasury(&h.employer, 10_000).await.unwrap();
    let confirmation = h
        .mirror
        .create_stream(&h.employer, ten_day_stream(8_640))
        .await
        .unwrap();
    confirmation.stream_id.unwrap()
}

#[tokio::test]
async fn confirmed_mutations_match_the_ledger() {
    let h = harness();
    let id = funded(&h).await;

    h.clock.advance(5 * DAY);
    h.mirror.withdraw_wages(&h.employee, id).await.unwrap();

    let truth = h.ledger.snapshot();
    let local = h.mirror.snapshot();
    assert_eq!(
        local.stream(id).unwrap().to_record(),
        truth.stream(id).unwrap().to_record()
    );
    assert_eq!(
        local.treasury(&acct("acme")).unwrap().to_record(),
        truth.treasury(&acct("acme")).unwrap().to_record()
    );

    let treasury = h.mirror.treasury(&acct("acme")).unwrap();
    assert_eq!(treasury.total_balance(), 10_000 - 4_320);
    assert_eq!(treasury.allocated_balance(), 8_640 - 4_320);
    assert_eq!(treasury.available_balance(), 1_360);

    let dash = h.mirror.employee_dashboard(&h.employee).unwrap();
    assert_eq!(dash.total_withdrawn, 4_320);
    assert_eq!(dash.total_withdrawable, 0);

    assert!(h
        .mirror
        .pending()
        .list()
        .iter()
        .all(|m| m.status == MutationStatus::Confirmed));
    assert!(!h.mirror.journal().is_empty());
}

#[tokio::test]
async fn insufficient_funds_is_refused_before_submission() {
    let h = harness();
    h.mirror.initialize_treasury(&h.employer, 100).await.unwrap();
    h.mirror
        .create_stream(&h.employer, ten_day_stream(60))
        .await
        .unwrap();

    let err = h
        .mirror
        .create_stream(&h.employer, ten_day_stream(50))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ClientError::Domain(DomainError::insufficient_funds(50, 40))
    );
    assert!(!err.is_retryable());
    assert_eq!(h.mirror.pending().list().len(), 2);

    let treasury = h.mirror.treasury(&acct("acme")).unwrap();
    assert_eq!(treasury.allocated_balance(), 60);
    assert_eq!(treasury.available_balance(), 40);
}

#[tokio::test]
async fn sessions_are_checked_per_operation() {
    let h = harness();
    let id = funded(&h).await;
    h.clock.advance(DAY);

    assert!(unauthorized(h.mirror.pause_stream(&h.employee, id).await));
    assert!(unauthorized(
        h.mirror.pause_stream(&Session::employer(acct("rival")), id).await
    ));
    assert!(unauthorized(h.mirror.withdraw_wages(&h.employer, id).await));
    assert!(unauthorized(
        h.mirror
            .withdraw_wages(&Session::employee(acct("mallory")), id)
            .await
    ));
    assert!(unauthorized(h.mirror.deposit(&h.employee, 10).await));
    assert!(h.mirror.employer_dashboard(&h.employee).is_err());

    assert_eq!(h.ledger.snapshot().stream(id).unwrap().total_withdrawn(), 0);
}

#[tokio::test]
async fn rejected_write_rolls_back() {
    let h = harness();
    funded(&h).await;
    let before = h.mirror.treasury(&acct("acme")).unwrap();

    h.ledger.inject(WriteFault::Reject);
    let err = h.mirror.deposit(&h.employer, 500).await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected(_)));

    assert_eq!(h.mirror.treasury(&acct("acme")).unwrap(), before);
    assert_eq!(
        h.mirror.pending().with_status(MutationStatus::Rejected).len(),
        1
    );
    assert!(!h.mirror.is_unconfirmed(&RecordKey::Treasury(acct("acme"))));
}

#[tokio::test]
async fn unavailable_write_is_retryable_and_rolled_back() {
    let h = harness();
    funded(&h).await;

    h.ledger.inject(WriteFault::Unavailable);
    let err = h.mirror.deposit(&h.employer, 500).await.unwrap_err();
    assert!(matches!(err, ClientError::Transient(_)));
    assert!(err.is_retryable());
    assert_eq!(h.mirror.treasury(&acct("acme")).unwrap().total_balance(), 10_000);

    h.mirror.deposit(&h.employer, 500).await.unwrap();
    assert_eq!(h.mirror.treasury(&acct("acme")).unwrap().total_balance(), 10_500);
    assert_eq!(h.ledger.snapshot().treasury(&acct("acme")).unwrap().total_balance(), 10_500);
}

#[tokio::test]
async fn slow_confirmation_within_timeout_succeeds() {
    let h = harness();
    let id = funded(&h).await;
    h.clock.advance(DAY);

    h.ledger.inject(WriteFault::Delay(Duration::from_millis(5)));
    h.mirror.pause_stream(&h.employer, id).await.unwrap();
    assert_eq!(h.mirror.stream(id).unwrap().status(), StreamStatus::Paused);
}

#[tokio::test]
async fn timed_out_pause_is_rolled_back_then_reconciled() {
    let h = harness();
    let id = funded(&h).await;
    h.clock.advance(DAY);

    h.ledger.inject(WriteFault::DropConfirmation);
    let err = h.mirror.pause_stream(&h.employer, id).await.unwrap_err();
    assert_eq!(err, ClientError::Timeout(Duration::from_millis(50)));

    // Rolled back locally although the ledger applied it.
    assert_eq!(h.mirror.stream(id).unwrap().status(), StreamStatus::Active);
    assert_eq!(
        h.ledger.snapshot().stream(id).unwrap().status(),
        StreamStatus::Paused
    );
    assert!(h.mirror.is_unconfirmed(&RecordKey::Stream(id)));

    // The next mutation re-reads first, so resuming is valid.
    h.clock.advance(DAY);
    h.mirror.resume_stream(&h.employer, id).await.unwrap();
    assert!(!h.mirror.is_unconfirmed(&RecordKey::Stream(id)));

    h.clock.advance(DAY);
    let stream = h.mirror.stream(id).unwrap();
    assert_eq!(stream.status(), StreamStatus::Active);
    assert_eq!(stream.earned(h.clock.now()), 2 * 864);
}

#[tokio::test]
async fn timed_out_withdrawal_is_never_paid_twice() {
    let h = harness();
    let id = funded(&h).await;
    h.clock.advance(DAY);

    h.ledger.inject(WriteFault::DropConfirmation);
    let err = h.mirror.withdraw_wages(&h.employee, id).await.unwrap_err();
    assert!(err.is_retryable());

    let err = h.mirror.withdraw_wages(&h.employee, id).await.unwrap_err();
    assert_eq!(err, ClientError::Domain(DomainError::NothingToWithdraw));

    let truth = h.ledger.snapshot();
    assert_eq!(truth.stream(id).unwrap().total_withdrawn(), 864);
    assert_eq!(truth.treasury(&acct("acme")).unwrap().total_balance(), 10_000 - 864);
    assert_eq!(h.mirror.stream(id).unwrap().total_withdrawn(), 864);
}

#[tokio::test]
async fn timed_out_create_surfaces_after_refresh() {
    let h = harness();
    h.mirror.initialize_treasury(&h.employer, 10_000).await.unwrap();

    h.ledger.inject(WriteFault::DropConfirmation);
    let err = h
        .mirror
        .create_stream(&h.employer, ten_day_stream(1_000))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout(_)));
    assert!(h.mirror.stream(StreamId::FIRST).is_err());
    assert_eq!(h.mirror.treasury(&acct("acme")).unwrap().allocated_balance(), 0);

    h.mirror
        .create_stream(&h.employer, ten_day_stream(2_000))
        .await
        .unwrap();

    let local = h.mirror.snapshot();
    assert_eq!(local.streams_for_employer(&acct("acme")).count(), 2);
    assert_eq!(local.treasury(&acct("acme")).unwrap().allocated_balance(), 3_000);
}

#[tokio::test]
async fn ledger_assigned_stream_id_replaces_the_local_guess() {
    let h = harness();
    h.mirror.initialize_treasury(&h.employer, 10_000).await.unwrap();

    // Opened by another client; this mirror has not seen it.
    let elsewhere = h
        .ledger
        .create_stream(&CreateStream {
            employer: acct("acme"),
            employee: acct("bob"),
            total_amount: 1_000,
            duration_seconds: 10 * DAY,
            description: String::new(),
        })
        .await
        .unwrap();
    assert_eq!(elsewhere.stream_id, Some(StreamId::FIRST));
    assert!(h.mirror.stream(StreamId::FIRST).is_err());

    let confirmation = h
        .mirror
        .create_stream(&h.employer, ten_day_stream(8_640))
        .await
        .unwrap();
    let assigned = StreamId::new(2);
    assert_eq!(confirmation.stream_id, Some(assigned));

    let local = h.mirror.snapshot();
    let truth = h.ledger.snapshot();
    assert_eq!(local.stream(assigned).unwrap().total_deposited(), 8_640);
    assert_eq!(local.stream(assigned).unwrap().employee(), &acct("alice"));
    // The optimistic copy under the guessed id is gone; the ledger's stream took its place.
    assert_eq!(local.stream(StreamId::FIRST).unwrap().employee(), &acct("bob"));
    assert_eq!(
        local.stream(StreamId::FIRST).unwrap().to_record(),
        truth.stream(StreamId::FIRST).unwrap().to_record()
    );
    assert_eq!(local.treasury(&acct("acme")).unwrap().allocated_balance(), 9_640);
    assert_eq!(local.next_stream_id(), StreamId::new(3));
    assert!(!h.mirror.is_unconfirmed(&RecordKey::Stream(assigned)));
}

#[tokio::test]
async fn desynced_record_halts_until_resync() {
    let h = harness();
    let id = funded(&h).await;
    h.clock.advance(DAY);

    let mut bad = h.ledger.snapshot().stream(id).unwrap().to_record();
    bad.total_withdrawn = 5_000;
    h.ledger.override_stream_record(bad);

    let err = h.mirror.refresh_stream(id).await.unwrap_err();
    assert!(matches!(err, ClientError::Domain(DomainError::LedgerDesync(_))));
    assert!(h.mirror.is_halted(&RecordKey::Stream(id)));
    // The last good copy stays visible.
    assert_eq!(h.mirror.stream(id).unwrap().total_withdrawn(), 0);

    let err = h.mirror.pause_stream(&h.employer, id).await.unwrap_err();
    assert!(matches!(err, ClientError::Halted(_)));

    // Still bad: stays halted.
    assert!(h.mirror.resync(&RecordKey::Stream(id)).await.is_err());
    assert!(h.mirror.is_halted(&RecordKey::Stream(id)));

    h.ledger.clear_overrides();
    h.mirror.resync(&RecordKey::Stream(id)).await.unwrap();
    assert!(h.mirror.halted().is_empty());
    h.mirror.pause_stream(&h.employer, id).await.unwrap();
}

#[tokio::test]
async fn reads_retry_transient_failures() {
    let h = harness();
    let id = funded(&h).await;

    h.ledger.fail_reads(2);
    h.mirror.refresh_stream(id).await.unwrap();

    h.ledger.fail_reads(10);
    let err = h.mirror.refresh_stream(id).await.unwrap_err();
    assert!(matches!(err, ClientError::Transient(_)));
    h.ledger.fail_reads(0);
}

#[tokio::test]
async fn dispute_freezes_withdrawal_until_released() {
    let h = harness();
    let id = funded(&h).await;
    h.clock.advance(2 * DAY);

    h.mirror.raise_dispute(&h.employee, id).await.unwrap();
    assert_eq!(h.mirror.stream(id).unwrap().status(), StreamStatus::Disputed);
    let err = h.mirror.withdraw_wages(&h.employee, id).await.unwrap_err();
    assert!(matches!(err, ClientError::Domain(DomainError::InvalidState(_))));

    h.ledger.arbitrate(id, DisputeOutcome::Release).unwrap();
    h.mirror.refresh_stream(id).await.unwrap();
    assert_eq!(h.mirror.stream(id).unwrap().status(), StreamStatus::Active);

    h.mirror.withdraw_wages(&h.employee, id).await.unwrap();
    assert_eq!(h.mirror.stream(id).unwrap().total_withdrawn(), 1_728);
}

#[tokio::test]
async fn employee_mirror_loads_from_ledger() {
    let h = harness();
    let id = funded(&h).await;
    h.clock.advance(3 * DAY);

    let worker_view = LedgerMirror::new(Arc::clone(&h.ledger), h.clock.clone(), config());
    worker_view.load_account(&acct("alice")).await.unwrap();

    let dash = worker_view.employee_dashboard(&h.employee).unwrap();
    assert_eq!(dash.streams.len(), 1);
    assert_eq!(dash.total_withdrawable, 3 * 864);

    worker_view.withdraw_wages(&h.employee, id).await.unwrap();
    assert_eq!(
        h.ledger.snapshot().stream(id).unwrap().total_withdrawn(),
        3 * 864
    );
}

#[tokio::test]
async fn employer_dashboard_tracks_settlement() {
    let h = harness();
    let id = funded(&h).await;
    h.clock.advance(4 * DAY);

    h.mirror.terminate_stream(&h.employer, id).await.unwrap();

    let dash = h.mirror.employer_dashboard(&h.employer).unwrap();
    assert_eq!(dash.total_balance, 10_000 - 3_456);
    assert_eq!(dash.allocated_balance, 0);
    assert_eq!(dash.available_balance, 10_000 - 3_456);
    assert_eq!(dash.active_streams, 0);
    assert_eq!(dash.runway_seconds, None);
    assert_eq!(dash.health_ratio, 100);
}

fn unauthorized<T>(result: Result<T, ClientError>) -> bool {
    matches!(result, Err(ClientError::Domain(DomainError::Unauthorized(_))))
}
