//! Process-wide tracing setup shared by the payroll binaries and tests.

/// Install the default subscriber (JSON lines, `RUST_LOG` filter).
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Subscriber for test runs: human-readable, captured by the test harness.
pub fn init_for_tests() {
    tracing::init_test();
}

/// Subscriber construction (filters, formats).
pub mod tracing;

pub use self::tracing::LogFormat;
