//! Tracing compatibility layer for structured logging.
//!
//! This module provides a unified interface for logging that works whether or
//! not the `tracing-integration` feature is enabled:
//!
//! - **With feature enabled**: Re-exports from the `tracing` crate.
//! - **Without feature**: No-op macros that compile to nothing.
//!
//! # Usage
//!
//! ```rust,ignore
//! use effectus::tracing_compat::{debug, trace};
//!
//! debug!(fiber = %id, "fiber forked");
//! ```
//!
//! # Feature Flag
//!
//! ```toml
//! effectus = { version = "0.1", features = ["tracing-integration"] }
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! No-op implementations when tracing is disabled.

    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! __effectus_trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! __effectus_debug {
        ($($arg:tt)*) => {};
    }

    /// No-op info-level logging macro.
    #[macro_export]
    macro_rules! __effectus_info {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! __effectus_warn {
        ($($arg:tt)*) => {};
    }

    /// No-op error-level logging macro.
    #[macro_export]
    macro_rules! __effectus_error {
        ($($arg:tt)*) => {};
    }

    pub use crate::{
        __effectus_debug as debug, __effectus_error as error, __effectus_info as info,
        __effectus_trace as trace, __effectus_warn as warn,
    };
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;

/// Returns true when structured logging is compiled in.
#[must_use]
pub const fn is_enabled() -> bool {
    cfg!(feature = "tracing-integration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_accept_structured_fields() {
        let fiber = 7_u64;
        trace!(fiber, "trace");
        debug!(fiber = %fiber, "debug");
        info!(fiber = ?fiber, "info {}", 1);
        warn!("warn");
        error!(reason = "x", "error");
        assert_eq!(is_enabled(), cfg!(feature = "tracing-integration"));
    }
}
