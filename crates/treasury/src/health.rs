//! Treasury health classification.
//!
//! Display and alerting policy only; nothing here gates a ledger operation.

use serde::{Deserialize, Serialize};

use wagestream_core::{DomainError, DomainResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

/// Percentage bands for [`HealthStatus`].
///
/// A ratio at or above `healthy_min_pct` is healthy, at or above
/// `warning_min_pct` is a warning, anything lower is critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthThresholds {
    healthy_min_pct: u8,
    warning_min_pct: u8,
}

impl HealthThresholds {
    pub fn new(healthy_min_pct: u8, warning_min_pct: u8) -> DomainResult<Self> {
        if healthy_min_pct > 100 {
            return Err(DomainError::invalid_input(
                "healthy threshold cannot exceed 100%",
            ));
        }
        if warning_min_pct > healthy_min_pct {
            return Err(DomainError::invalid_input(
                "warning threshold cannot exceed healthy threshold",
            ));
        }
        Ok(Self {
            healthy_min_pct,
            warning_min_pct,
        })
    }

    pub fn healthy_min_pct(&self) -> u8 {
        self.healthy_min_pct
    }

    pub fn warning_min_pct(&self) -> u8 {
        self.warning_min_pct
    }

    pub fn classify(&self, ratio_pct: u8) -> HealthStatus {
        if ratio_pct >= self.healthy_min_pct {
            HealthStatus::Healthy
        } else if ratio_pct >= self.warning_min_pct {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        }
    }
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            healthy_min_pct: 50,
            warning_min_pct: 20,
        }
    }
}
