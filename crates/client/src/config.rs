//! Client configuration.
//!
//! Every setting has a default; environment variables override them:
//!
//! | variable | default |
//! |---|---|
//! | `WAGESTREAM_SUBMIT_TIMEOUT_MS` | 10000 |
//! | `WAGESTREAM_READ_RETRIES` | 3 |
//! | `WAGESTREAM_READ_BACKOFF_MS` | 200 |
//! | `WAGESTREAM_HEALTHY_PCT` | 50 |
//! | `WAGESTREAM_WARNING_PCT` | 20 |

use std::str::FromStr;
use std::time::Duration;

use wagestream_treasury::HealthThresholds;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// How long a write may wait for the ledger's confirmation.
    pub submit_timeout: Duration,
    /// Extra attempts for a failed read.
    pub read_retries: u32,
    /// Delay before the first read retry; doubles on each further attempt.
    pub read_backoff: Duration,
    pub thresholds: HealthThresholds,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            submit_timeout: Duration::from_millis(10_000),
            read_retries: 3,
            read_backoff: Duration::from_millis(200),
            thresholds: HealthThresholds::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their default and
    /// unparseable values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let submit_timeout = parsed(&lookup, "WAGESTREAM_SUBMIT_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.submit_timeout);
        let read_retries =
            parsed(&lookup, "WAGESTREAM_READ_RETRIES").unwrap_or(defaults.read_retries);
        let read_backoff = parsed(&lookup, "WAGESTREAM_READ_BACKOFF_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.read_backoff);

        let healthy = parsed(&lookup, "WAGESTREAM_HEALTHY_PCT")
            .unwrap_or(defaults.thresholds.healthy_min_pct());
        let warning = parsed(&lookup, "WAGESTREAM_WARNING_PCT")
            .unwrap_or(defaults.thresholds.warning_min_pct());
        let thresholds = HealthThresholds::new(healthy, warning).unwrap_or_else(|err| {
            tracing::warn!(%err, healthy, warning, "invalid health thresholds; using defaults");
            defaults.thresholds
        });

        Self {
            submit_timeout,
            read_retries,
            read_backoff,
            thresholds,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}
