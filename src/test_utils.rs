//! Test helpers: logging initialization, phase markers and exit assertions.
//!
//! Compiled for unit tests and for the `test-internals` feature, which
//! integration tests rely on.
//!
//! ```rust,ignore
//! #[test]
//! fn my_test() {
//!     init_test_logging();
//!     test_phase!("my_test");
//!     let rt = test_runtime();
//!     let exit = rt.run(Effect::<_, ()>::succeed(1));
//!     assert_exit_success!(exit, 1);
//!     test_complete!("my_test");
//! }
//! ```

use crate::effect::Effect;
use crate::runtime::{Runtime, RuntimeBuilder};
use crate::types::Exit;
use std::sync::Once;
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Default seed used for jittered schedules in tests.
pub const DEFAULT_TEST_SEED: u64 = 0xDEAD_BEEF;

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Builds a current-thread runtime on a virtual clock.
///
/// Sleeps and schedule delays complete instantly in real time while the
/// virtual clock records their full length.
#[must_use]
pub fn test_runtime() -> Runtime {
    match RuntimeBuilder::current_thread().virtual_time(true).build() {
        Ok(rt) => rt,
        Err(err) => unreachable!("test runtime configuration is valid: {err}"),
    }
}

/// Runs an effect on a fresh [`test_runtime`] and returns its exit.
pub fn run_test<A, E>(effect: Effect<A, E>) -> Exit<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    init_test_logging();
    test_runtime().run(effect)
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
}

/// Assert with structured logging of expected and actual values.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Assert that an exit is a success with the given value.
#[macro_export]
macro_rules! assert_exit_success {
    ($exit:expr, $expected:expr) => {
        match $exit {
            $crate::types::Exit::Success(v) => assert_eq!(v, $expected),
            other => unreachable!("expected Exit::Success({:?}), got {:?}", $expected, other),
        }
    };
}

/// Assert that an exit is a failure and return its cause.
#[macro_export]
macro_rules! assert_exit_failure {
    ($exit:expr) => {
        match $exit {
            $crate::types::Exit::Failure(cause) => cause,
            other => unreachable!("expected Exit::Failure, got {:?}", other),
        }
    };
}
