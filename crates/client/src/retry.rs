//! Exponential backoff for ledger reads.
//!
//! Writes never go through here: a write that may have landed is confirmed
//! by reading it back, not by submitting it again.

use std::future::Future;
use std::time::Duration;

use crate::ledger::LedgerResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRetry {
    pub max_retries: u32,
    pub initial_delay: Duration,
}

impl ReadRetry {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
        }
    }

    /// Run `read`, retrying transient failures with doubling delays.
    pub async fn run<T, F, Fut>(&self, what: &str, mut read: F) -> LedgerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LedgerResult<T>>,
    {
        let mut delay = self.initial_delay;
        let mut attempt = 0;
        loop {
            match read().await {
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(%err, attempt, what, "ledger read failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let policy = ReadRetry::new(3, Duration::from_millis(1));
        let out = policy
            .run("balance read", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(LedgerError::Unavailable("down".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(out, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let policy = ReadRetry::new(2, Duration::from_millis(1));
        let out: LedgerResult<()> = policy
            .run("balance read", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::Unavailable("down".into()))
            })
            .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = ReadRetry::new(5, Duration::from_millis(1));
        let out: LedgerResult<()> = policy
            .run("balance read", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::NotFound("stream#9".into()))
            })
            .await;
        assert_eq!(out, Err(LedgerError::NotFound("stream#9".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
