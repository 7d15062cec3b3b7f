//! Payroll accounting views.
//!
//! Pure read-side aggregation: no IO and no mutation of the records it is
//! handed.

pub mod view;

pub use view::{
    AccountingView, BurnRate, EmployeeDashboard, EmployerDashboard, SECONDS_PER_MONTH,
    StreamSummary,
};
