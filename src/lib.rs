//! Effectus: a structured-concurrency effect runtime.
//!
//! # Overview
//!
//! Programs are built as [`Effect`] values: lazy, re-runnable descriptions
//! of work that succeed with a value or terminate with a [`Cause`]. A cause
//! keeps every reason a computation ended abnormally (typed failures,
//! defects, interruptions) together with how they happened, in sequence or
//! in parallel. Nothing is lost when two fibers fail at once or a finalizer
//! fails after the body already did.
//!
//! A [`Runtime`] runs effects in fibers. Fibers are cooperative: they give
//! the worker back at suspension points (awaiting another fiber, a
//! [`Latch`], a schedule delay, or an injected future) and that is also
//! where interruption is observed.
//!
//! # Core Guarantees
//!
//! - **Complete causes**: parallel failures combine with `Parallel`, cleanup
//!   failures after a failed body with `Sequential`
//! - **Cooperative interruption**: a request only sets a flag; the target
//!   unwinds at its next suspension point and runs its finalizers
//! - **Uninterruptible regions**: finalizers and masked effects defer
//!   interruption until they are done
//! - **Deterministic tests**: a current-thread runtime can run on a virtual
//!   clock that jumps to the next timer deadline
//!
//! # Module Structure
//!
//! - [`types`]: fiber ids, time, the cause algebra and exits
//! - [`effect`]: the `Effect` type, its combinators, services and scopes
//! - [`fiber`]: fiber handles and statuses
//! - [`runtime`]: the scheduler, runtime builder and configuration
//! - [`time`]: clocks, timers and sleeping
//! - [`sync`]: the latch
//! - [`schedule`]: recurrence policies for retry and repeat
//! - [`stream`]: pull-based streams
//! - [`storage`]: the key-value storage capability
//! - [`decode`]: fallible decoding of raw input
//! - [`error`](mod@error): runtime construction errors
//! - [`tracing_compat`]: optional tracing integration (requires `tracing-integration` feature)
//!
//! ```
//! use effectus::{Effect, Exit, RuntimeBuilder};
//! use std::time::Duration;
//!
//! let rt = RuntimeBuilder::current_thread().virtual_time(true).build().unwrap();
//! let slow = Effect::<&str, ()>::succeed("slow").delay(Duration::from_secs(5));
//! let fast = Effect::<&str, ()>::succeed("fast").delay(Duration::from_secs(1));
//! assert_eq!(rt.run(slow.race(fast)), Exit::succeed("fast"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod decode;
pub mod effect;
pub mod error;
pub mod fiber;
pub mod runtime;
pub mod schedule;
pub mod storage;
pub mod stream;
pub mod sync;
pub mod time;
pub mod tracing_compat;
pub mod types;
pub mod util;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use effect::{Context, Effect, Scope};
pub use error::{Error, Result};
pub use fiber::{FiberHandle, FiberStatus, SuspendReason};
pub use runtime::{Runtime, RuntimeBuilder, RuntimeConfig, RuntimeFlavor, RuntimeHandle};
pub use schedule::{Decision, Schedule, ScheduleDriver, ScheduleExt};
pub use storage::{KeyValueStore, Storage, StorageError};
pub use stream::{Chunk, Pull, Stream};
pub use sync::Latch;
pub use types::{Cause, CauseLeaf, CauseReducer, Defect, Exit, FiberId, Subcause, Time};
