//! Injectable time source.
//!
//! Accrual depends on wall-clock time, so every component that needs "now"
//! receives a [`Clock`] instead of reading the system time itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Unix timestamp in whole seconds, the resolution used by the external ledger.
pub type Timestamp = i64;

pub const SECONDS_PER_DAY: u64 = 86_400;

/// Source of the current time.
pub trait Clock: Send + Sync + core::fmt::Debug {
    fn now(&self) -> Timestamp;
}

impl<C> Clock for Arc<C>
where
    C: Clock + ?Sized,
{
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now().timestamp()
    }
}

/// Manually driven clock for tests and simulations.
///
/// Clones share the same underlying instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    pub fn set(&self, at: Timestamp) {
        self.now.store(at, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) {
        let delta = i64::try_from(seconds).unwrap_or(i64::MAX);
        self.now.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
