//! Employer treasuries: pooled balances partitioned into available, allocated
//! and reserve funds.
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod health;
pub mod treasury;

pub use health::{HealthStatus, HealthThresholds};
pub use treasury::{
    EmployerTreasury, InitializeTreasury, TreasuryCommand, TreasuryEvent, TreasuryInitialized,
    TreasuryMovement, TreasuryRecord,
};
