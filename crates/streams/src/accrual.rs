//! Fixed-point accrual arithmetic.
//!
//! Rates are stored as base units per second multiplied by [`PRECISION`].
//! Every earned amount in the workspace (per-stream balances, dashboards,
//! burn rates) goes through [`accrue`]; nothing re-derives the formula.

use wagestream_core::{DomainError, DomainResult, Timestamp};

/// Rate scaling factor. Must equal the external ledger's constant.
pub const PRECISION: u64 = 100_000_000;

/// Amount earned at `rate_per_second` (scaled by [`PRECISION`]) over
/// `elapsed_seconds`, rounded down.
///
/// Computed in `u128`; a result above `u64::MAX` saturates.
pub fn accrue(rate_per_second: u64, elapsed_seconds: u64) -> u64 {
    let scaled = rate_per_second as u128 * elapsed_seconds as u128;
    u64::try_from(scaled / PRECISION as u128).unwrap_or(u64::MAX)
}

/// Scaled per-second rate that pays `total_amount` over `duration_seconds`.
///
/// Rounds up: `accrue(rate, duration_seconds) >= total_amount` always holds, and
/// the overshoot is below one base unit whenever `duration_seconds < PRECISION`.
/// Callers cap earnings at the deposited total, so the stream pays out exactly
/// `total_amount` by its end.
pub fn rate_for(total_amount: u64, duration_seconds: u64) -> DomainResult<u64> {
    if total_amount == 0 {
        return Err(DomainError::invalid_input("total amount must be positive"));
    }
    if duration_seconds == 0 {
        return Err(DomainError::invalid_input("duration must be positive"));
    }

    let scaled = total_amount as u128 * PRECISION as u128;
    let rate = scaled.div_ceil(duration_seconds as u128);
    u64::try_from(rate).map_err(|_| {
        DomainError::invalid_input(format!(
            "rate for {total_amount} over {duration_seconds}s overflows the ledger rate type"
        ))
    })
}

/// Whole seconds that `amount` funds at a combined scaled `rate_per_second`.
///
/// The inverse of [`accrue`], rounded down; `None` when nothing accrues.
pub fn seconds_covered(rate_per_second: u64, amount: u64) -> Option<u64> {
    if rate_per_second == 0 {
        return None;
    }
    let seconds = amount as u128 * PRECISION as u128 / rate_per_second as u128;
    Some(u64::try_from(seconds).unwrap_or(u64::MAX))
}

/// Timing facts of a stream that determine how long it has actually accrued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccrualWindow {
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub accumulated_pause: u64,
    /// Start of the pause currently in progress, if any.
    pub open_pause_since: Option<Timestamp>,
}

impl AccrualWindow {
    /// Scheduled length of the stream in seconds.
    pub fn duration(&self) -> u64 {
        span(self.start_time, self.end_time)
    }

    /// Seconds of accrual up to `now`.
    ///
    /// Time after `end_time`, completed pauses and the open pause are excluded;
    /// the result is clamped to `[0, duration]`.
    pub fn effective_elapsed(&self, now: Timestamp) -> u64 {
        let horizon = now.min(self.end_time);
        let mut elapsed = span(self.start_time, horizon);

        elapsed = elapsed.saturating_sub(self.accumulated_pause);
        if let Some(since) = self.open_pause_since {
            elapsed = elapsed.saturating_sub(span(since, horizon));
        }

        elapsed.min(self.duration())
    }

    /// Length of a pause that started at `since` and ends at `now`, counting
    /// only the part that falls inside the schedule.
    pub fn pause_length(&self, since: Timestamp, now: Timestamp) -> u64 {
        span(since.max(self.start_time), now.min(self.end_time))
    }
}

/// Non-negative number of seconds from `from` to `to`.
fn span(from: Timestamp, to: Timestamp) -> u64 {
    u64::try_from(to.saturating_sub(from)).unwrap_or(0)
}
