//! Employer and employee dashboards.
//!
//! Every figure is recomputed from the records passed in and the supplied
//! time, through the same accrual function the streams use. Nothing is
//! cached, so the same inputs always produce the same dashboard.

use serde::{Deserialize, Serialize};

use wagestream_core::{AccountId, SECONDS_PER_DAY, StreamId, Timestamp};
use wagestream_streams::{StreamStatus, WageStream, accrue, seconds_covered};
use wagestream_treasury::{EmployerTreasury, HealthStatus, HealthThresholds};

/// Length of the "month" used for burn-rate reporting.
pub const SECONDS_PER_MONTH: u64 = 30 * SECONDS_PER_DAY;

/// Per-stream figures as of a given time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub stream_id: StreamId,
    pub employer: AccountId,
    pub employee: AccountId,
    pub status: StreamStatus,
    pub total_deposited: u64,
    pub earned: u64,
    pub withdrawn: u64,
    /// Earned and not yet paid, regardless of whether the status allows a
    /// withdrawal right now.
    pub unpaid: u64,
    /// Part of `unpaid` the employee may withdraw at this moment.
    pub claimable: u64,
    /// Share of the deposit earned so far, in basis points.
    pub progress_bps: u32,
    pub end_time: Timestamp,
}

impl StreamSummary {
    pub fn of(stream: &WageStream, now: Timestamp) -> Self {
        let earned = stream.earned(now);
        let unpaid = stream.withdrawable(now);
        let claimable = if stream.can_withdraw(now) { unpaid } else { 0 };
        let progress_bps = if stream.total_deposited() == 0 {
            0
        } else {
            (earned as u128 * 10_000 / stream.total_deposited() as u128) as u32
        };

        Self {
            stream_id: stream.id_typed(),
            employer: stream.employer().clone(),
            employee: stream.employee().clone(),
            status: stream.status(),
            total_deposited: stream.total_deposited(),
            earned,
            withdrawn: stream.total_withdrawn(),
            unpaid,
            claimable,
            progress_bps,
            end_time: stream.end_time(),
        }
    }
}

/// What an employer's active streams pay out over standard windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnRate {
    /// Σ scaled per-second rates (see `wagestream_streams::PRECISION`).
    pub scaled_per_second: u64,
    pub per_day: u64,
    pub per_month: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeDashboard {
    pub employee: AccountId,
    pub as_of: Timestamp,
    pub total_earned: u64,
    pub total_withdrawn: u64,
    /// Withdrawable right now across all streams.
    pub total_withdrawable: u64,
    /// Earned but held back by a pause or a dispute.
    pub total_on_hold: u64,
    pub active_streams: usize,
    pub streams: Vec<StreamSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployerDashboard {
    pub employer: AccountId,
    pub as_of: Timestamp,
    pub total_balance: u64,
    pub allocated_balance: u64,
    pub available_balance: u64,
    pub reserve_balance: u64,
    pub health_ratio: u8,
    pub health: HealthStatus,
    pub active_streams: usize,
    pub burn_rate: BurnRate,
    /// Σ (deposited − earned) over active streams.
    pub remaining_obligations: u64,
    /// How long the available balance would fund the current burn.
    pub runway_seconds: Option<u64>,
    pub streams: Vec<StreamSummary>,
}

/// Read-only aggregation over stream and treasury records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountingView {
    thresholds: HealthThresholds,
}

impl AccountingView {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self { thresholds }
    }

    /// Dashboard for `employee` over whichever of `streams` pay them.
    pub fn employee_dashboard<'a>(
        &self,
        employee: &AccountId,
        streams: impl IntoIterator<Item = &'a WageStream>,
        now: Timestamp,
    ) -> EmployeeDashboard {
        let summaries: Vec<StreamSummary> = streams
            .into_iter()
            .filter(|s| s.employee() == employee)
            .map(|s| StreamSummary::of(s, now))
            .collect();

        EmployeeDashboard {
            employee: employee.clone(),
            as_of: now,
            total_earned: total(summaries.iter().map(|s| s.earned)),
            total_withdrawn: total(summaries.iter().map(|s| s.withdrawn)),
            total_withdrawable: total(summaries.iter().map(|s| s.claimable)),
            total_on_hold: total(summaries.iter().map(|s| s.unpaid - s.claimable)),
            active_streams: count_active(&summaries),
            streams: summaries,
        }
    }

    /// Dashboard for the owner of `treasury` over whichever of `streams` it
    /// funds.
    pub fn employer_dashboard<'a>(
        &self,
        treasury: &EmployerTreasury,
        streams: impl IntoIterator<Item = &'a WageStream>,
        now: Timestamp,
    ) -> EmployerDashboard {
        let owned: Vec<&WageStream> = streams
            .into_iter()
            .filter(|s| s.employer() == treasury.owner())
            .collect();

        let active: Vec<&WageStream> = owned
            .iter()
            .copied()
            .filter(|s| s.status() == StreamStatus::Active)
            .collect();

        let burn_rate = burn_rate(&active);
        let remaining_obligations = total(active.iter().map(|s| s.unearned(now)));

        EmployerDashboard {
            employer: treasury.owner().clone(),
            as_of: now,
            total_balance: treasury.total_balance(),
            allocated_balance: treasury.allocated_balance(),
            available_balance: treasury.available_balance(),
            reserve_balance: treasury.reserve_balance(),
            health_ratio: treasury.health_ratio(),
            health: treasury.health(&self.thresholds),
            active_streams: active.len(),
            burn_rate,
            remaining_obligations,
            runway_seconds: seconds_covered(
                burn_rate.scaled_per_second,
                treasury.available_balance(),
            ),
            streams: owned.iter().map(|s| StreamSummary::of(s, now)).collect(),
        }
    }
}

/// Burn over each window is the sum of per-stream accruals, each floored on
/// its own, matching what the streams will actually pay.
fn burn_rate(active: &[&WageStream]) -> BurnRate {
    active.iter().fold(BurnRate::default(), |acc, s| BurnRate {
        scaled_per_second: acc.scaled_per_second.saturating_add(s.rate_per_second()),
        per_day: acc
            .per_day
            .saturating_add(accrue(s.rate_per_second(), SECONDS_PER_DAY)),
        per_month: acc
            .per_month
            .saturating_add(accrue(s.rate_per_second(), SECONDS_PER_MONTH)),
    })
}

/// Amounts from many streams can exceed `u64` together; totals pin at the max.
fn total(amounts: impl Iterator<Item = u64>) -> u64 {
    amounts.fold(0, u64::saturating_add)
}

fn count_active(summaries: &[StreamSummary]) -> usize {
    summaries
        .iter()
        .filter(|s| s.status == StreamStatus::Active)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use wagestream_ledger::{CreateStream, PayrollBook};

    const DAY: i64 = 86_400;
    const T0: Timestamp = 1_700_000_000;

    fn acct(s: &str) -> AccountId {
        AccountId::parse(s).unwrap()
    }

    /// acme funds 20_000 and opens 8_640/10d and 700/7d for alice and
    /// 3_000/30d for bob, all at `T0`.
    fn book() -> PayrollBook {
        let mut book = PayrollBook::new();
        book.initialize_treasury(acct("acme"), 20_000, T0).unwrap();
        let plan = [("alice", 8_640, 10), ("bob", 3_000, 30), ("alice", 700, 7)];
        for (employee, amount, days) in plan {
            book.create_stream(
                &CreateStream {
                    employer: acct("acme"),
                    employee: acct(employee),
                    total_amount: amount,
                    duration_seconds: days * SECONDS_PER_DAY,
                    description: String::new(),
                },
                T0,
            )
            .unwrap();
        }
        book
    }

    #[test]
    fn employee_totals_cover_only_their_streams() {
        let book = book();
        let view = AccountingView::default();
        let dash = view.employee_dashboard(&acct("alice"), book.streams(), T0 + 5 * DAY);

        assert_eq!(dash.streams.len(), 2);
        assert_eq!(dash.total_earned, 4_320 + 500);
        assert_eq!(dash.total_withdrawable, 4_820);
        assert_eq!(dash.total_on_hold, 0);
        assert_eq!(dash.active_streams, 2);
        assert_eq!(dash.streams[0].progress_bps, 5_000);
    }

    #[test]
    fn paused_earnings_are_on_hold() {
        let mut book = book();
        book.pause_stream(StreamId::FIRST, T0 + 2 * DAY).unwrap();
        let dash = AccountingView::default().employee_dashboard(
            &acct("alice"),
            book.streams(),
            T0 + 3 * DAY,
        );
        assert_eq!(dash.total_on_hold, 1_728);
        assert_eq!(dash.total_withdrawable, 300);
        assert_eq!(dash.total_earned, 2_028);
        assert_eq!(dash.active_streams, 1);
    }

    #[test]
    fn employer_burn_and_obligations_use_active_streams_only() {
        let mut book = book();
        book.pause_stream(StreamId::new(2), T0).unwrap();
        let treasury = book.treasury(&acct("acme")).unwrap();
        let dash = AccountingView::default().employer_dashboard(treasury, book.streams(), T0 + DAY);

        assert_eq!(dash.active_streams, 2);
        assert_eq!(dash.burn_rate.per_day, 864 + 100);
        // Windows longer than a stream's schedule are not capped.
        assert_eq!(dash.burn_rate.per_month, 25_920 + 3_000);
        assert_eq!(dash.remaining_obligations, (8_640 - 864) + (700 - 100));
        assert_eq!(dash.allocated_balance, 12_340);
        assert_eq!(dash.available_balance, 7_660);
        assert_eq!(dash.streams.len(), 3);
    }

    #[test]
    fn runway_and_health_follow_treasury() {
        let book = book();
        let treasury = book.treasury(&acct("acme")).unwrap();

        let dash = AccountingView::default().employer_dashboard(treasury, book.streams(), T0);
        assert_eq!(dash.health_ratio, 38);
        assert_eq!(dash.health, HealthStatus::Warning);

        let runway = dash.runway_seconds.unwrap();
        let burn = dash.burn_rate.scaled_per_second;
        assert!(accrue(burn, runway) <= 7_660);
        assert!(accrue(burn, runway + 1) >= 7_660);

        let strict = AccountingView::new(HealthThresholds::new(90, 40).unwrap());
        let dash = strict.employer_dashboard(treasury, book.streams(), T0);
        assert_eq!(dash.health, HealthStatus::Critical);
    }

    #[test]
    fn no_active_streams_means_no_runway() {
        let mut book = PayrollBook::new();
        book.initialize_treasury(acct("acme"), 500, T0).unwrap();
        let treasury = book.treasury(&acct("acme")).unwrap();
        let dash = AccountingView::default().employer_dashboard(treasury, book.streams(), T0);
        assert_eq!(dash.runway_seconds, None);
        assert_eq!(dash.burn_rate, BurnRate::default());
        assert_eq!(dash.health, HealthStatus::Healthy);
    }

    fn open(book: &mut PayrollBook, employer: &str, amount: u64, duration_seconds: u64) {
        book.create_stream(
            &CreateStream {
                employer: acct(employer),
                employee: acct("alice"),
                total_amount: amount,
                duration_seconds,
                description: String::new(),
            },
            T0,
        )
        .unwrap();
    }

    #[test]
    fn burn_totals_saturate_across_many_fast_streams() {
        let mut book = PayrollBook::new();
        book.initialize_treasury(acct("acme"), 2_000_000_000_000_000_000, T0)
            .unwrap();
        for _ in 0..45 {
            open(&mut book, "acme", 180_000_000_000, 1);
        }
        let treasury = book.treasury(&acct("acme")).unwrap();
        let dash = AccountingView::default().employer_dashboard(treasury, book.streams(), T0);

        assert_eq!(dash.active_streams, 45);
        assert_eq!(dash.burn_rate.scaled_per_second, u64::MAX);
        assert_eq!(dash.burn_rate.per_day, 45 * 180_000_000_000 * 86_400);
        assert_eq!(dash.burn_rate.per_month, u64::MAX);
        assert_eq!(dash.remaining_obligations, 45 * 180_000_000_000);
    }

    #[test]
    fn employee_totals_saturate_across_employers() {
        let half = 1u64 << 63;
        let mut book = PayrollBook::new();
        for employer in ["acme", "globex"] {
            book.initialize_treasury(acct(employer), half, T0).unwrap();
            open(&mut book, employer, half, 100_000_000);
        }
        let dash = AccountingView::default().employee_dashboard(
            &acct("alice"),
            book.streams(),
            T0 + 100_000_000,
        );

        assert_eq!(dash.streams.len(), 2);
        assert!(dash.streams.iter().all(|s| s.earned == half));
        assert_eq!(dash.total_earned, u64::MAX);
        assert_eq!(dash.total_withdrawable, u64::MAX);
        assert_eq!(dash.total_withdrawn, 0);
    }

    proptest! {
        /// Property: two queries with no intervening mutation and the same
        /// timestamp are identical.
        #[test]
        fn dashboards_are_idempotent(offset in 0i64..40 * DAY) {
            let book = book();
            let view = AccountingView::default();
            let treasury = book.treasury(&acct("acme")).unwrap();
            let now = T0 + offset;
            prop_assert_eq!(
                view.employer_dashboard(treasury, book.streams(), now),
                view.employer_dashboard(treasury, book.streams(), now)
            );
            prop_assert_eq!(
                view.employee_dashboard(&acct("alice"), book.streams(), now),
                view.employee_dashboard(&acct("alice"), book.streams(), now)
            );
        }
    }
}
