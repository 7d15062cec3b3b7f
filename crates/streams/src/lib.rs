//! Wage streams: fixed-point accrual and the per-stream state machine.
//!
//! Pure domain logic only: no IO, no clocks, no persistence concerns.

pub mod accrual;
pub mod stream;

pub use accrual::{AccrualWindow, PRECISION, accrue, rate_for, seconds_covered};
pub use stream::{
    DisputeOutcome, DisputeRaised, DisputeReleased, OpenStream, StreamCommand, StreamEvent,
    StreamOpened, StreamPaused, StreamRecord, StreamResumed, StreamSettled, StreamStatus,
    WageStream, WagesWithdrawn,
};
