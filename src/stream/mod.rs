//! Pull-based streams of effectful values.
//!
//! A [`Stream`] is a recipe for a pull effect. Running a stream opens a
//! fresh pull, which is an ordinary [`Effect`] yielding [`Pull::Emit`] with
//! the next chunk of values, or [`Pull::End`] once the stream is
//! exhausted. A failed pull fails the stream. Sinks such as
//! [`Stream::run_collect`] run the pull in a loop on the calling fiber.
//!
//! Pull state lives in the opened pull, not in the stream, so one stream
//! value can be run any number of times and every run starts from the
//! beginning.
//!
//! ```
//! use effectus::{RuntimeBuilder, Stream};
//!
//! let rt = RuntimeBuilder::current_thread().build().unwrap();
//! let evens = Stream::<u32, ()>::unfold(0, |n| Some((n, n + 1)))
//!     .filter(|n| n % 2 == 0)
//!     .map(|n| n * 10)
//!     .take(3);
//! assert_eq!(rt.run(evens.run_collect()).value(), Some(&vec![0, 20, 40]));
//! ```

mod constructors;
mod operators;
mod sink;

use crate::effect::Effect;
use std::fmt;
use std::sync::Arc;

/// A batch of values emitted by one pull.
pub type Chunk<T> = Vec<T>;

/// Outcome of one pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull<T> {
    /// The next values. A chunk may be empty; the stream then continues.
    Emit(Chunk<T>),
    /// The stream is exhausted. Pulling again keeps returning `End`.
    End,
}

impl<T> Pull<T> {
    /// A chunk holding a single value.
    #[must_use]
    pub fn single(value: T) -> Self {
        Self::Emit(vec![value])
    }

    /// Returns true for [`Pull::End`].
    #[must_use]
    pub const fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }

    /// Applies `f` to every value of an emitted chunk.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Pull<U> {
        match self {
            Self::Emit(chunk) => Pull::Emit(chunk.into_iter().map(f).collect()),
            Self::End => Pull::End,
        }
    }
}

type OpenFn<T, E> = dyn Fn() -> Effect<Pull<T>, E> + Send + Sync;

/// A re-runnable source of values that may fail with `E`.
pub struct Stream<T, E> {
    open: Arc<OpenFn<T, E>>,
}

impl<T, E> Clone for Stream<T, E> {
    fn clone(&self) -> Self {
        Self {
            open: Arc::clone(&self.open),
        }
    }
}

impl<T, E> fmt::Debug for Stream<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stream<{}, {}>",
            std::any::type_name::<T>(),
            std::any::type_name::<E>()
        )
    }
}

impl<T, E> Stream<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Builds a stream from a pull factory. `open` is called once per run
    /// and must return a pull with fresh state.
    #[must_use]
    pub fn from_pull<F>(open: F) -> Self
    where
        F: Fn() -> Effect<Pull<T>, E> + Send + Sync + 'static,
    {
        Self {
            open: Arc::new(open),
        }
    }

    /// Opens a fresh pull. Each run of the returned effect yields the next
    /// chunk.
    #[must_use]
    pub fn open(&self) -> Effect<Pull<T>, E> {
        (self.open)()
    }
}
