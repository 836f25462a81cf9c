//! Schedules: pure recurrence policies for retrying and repeating.
//!
//! A [`Schedule`] is a state machine. Each step consumes the time elapsed
//! since the loop started, the latest input (a failure cause when retrying,
//! a success value when repeating) and the current state, and decides
//! whether to go again and after what delay.
//!
//! Schedules hold no mutable state of their own. Every retry or repeat loop
//! calls [`Schedule::initial`] and owns the resulting state, so one schedule
//! value can drive any number of concurrent loops.
//!
//! ```
//! use effectus::schedule::{self, Decision, Schedule, ScheduleExt};
//! use std::time::Duration;
//!
//! let policy = schedule::exponential(Duration::from_millis(10), 2.0)
//!     .max_recurrences(3);
//! let mut state = Schedule::<()>::initial(&policy);
//! let mut delays = Vec::new();
//! while let Decision::Continue { delay, state: next, .. } =
//!     policy.step(Duration::ZERO, &(), state)
//! {
//!     delays.push(delay);
//!     state = next;
//! }
//! assert_eq!(delays, [10, 20, 40].map(Duration::from_millis));
//! ```

mod combinators;
mod driver;
mod primitives;

pub use combinators::{
    AndThen, Intersect, Jittered, MapOutput, MaxRecurrences, ScheduleExt, Union, UntilInput, UpTo,
    WhileInput, WhileOutput,
};
pub use driver::ScheduleDriver;
pub use primitives::{
    During, Exponential, Fibonacci, Fixed, Forever, Once, Recurs, Spaced, during, exponential,
    fibonacci, fixed, forever, once, recurs, spaced,
};

use std::time::Duration;

/// Outcome of one schedule step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision<S, O> {
    /// Go again after `delay`, continuing from `state`.
    Continue {
        /// How long to wait before the next attempt.
        delay: Duration,
        /// State for the next step.
        state: S,
        /// Value reported for this step.
        output: O,
    },
    /// Stop recurring.
    Done,
}

impl<S, O> Decision<S, O> {
    /// Returns true for [`Decision::Continue`].
    #[must_use]
    pub const fn is_continue(&self) -> bool {
        matches!(self, Self::Continue { .. })
    }

    /// The delay of a continuing decision.
    #[must_use]
    pub const fn delay(&self) -> Option<Duration> {
        match self {
            Self::Continue { delay, .. } => Some(*delay),
            Self::Done => None,
        }
    }

    /// Transforms the output, keeping delay and state.
    pub fn map_output<O2>(self, f: impl FnOnce(O) -> O2) -> Decision<S, O2> {
        match self {
            Self::Continue {
                delay,
                state,
                output,
            } => Decision::Continue {
                delay,
                state,
                output: f(output),
            },
            Self::Done => Decision::Done,
        }
    }

    /// Transforms the state, keeping delay and output.
    pub fn map_state<S2>(self, f: impl FnOnce(S) -> S2) -> Decision<S2, O> {
        match self {
            Self::Continue {
                delay,
                state,
                output,
            } => Decision::Continue {
                delay,
                state: f(state),
                output,
            },
            Self::Done => Decision::Done,
        }
    }
}

/// A recurrence policy over inputs of type `In`.
pub trait Schedule<In>: Send + Sync {
    /// Per-loop state.
    type State: Send;
    /// Value reported with each continuing decision.
    type Output: Send;

    /// State for a fresh loop.
    fn initial(&self) -> Self::State;

    /// Decides whether to recur after observing `input`.
    ///
    /// `elapsed` is the time since the loop started.
    fn step(&self, elapsed: Duration, input: &In, state: Self::State)
    -> Decision<Self::State, Self::Output>;
}

impl<In, S> Schedule<In> for std::sync::Arc<S>
where
    S: Schedule<In> + ?Sized,
{
    type State = S::State;
    type Output = S::Output;

    fn initial(&self) -> Self::State {
        (**self).initial()
    }

    fn step(
        &self,
        elapsed: Duration,
        input: &In,
        state: Self::State,
    ) -> Decision<Self::State, Self::Output> {
        (**self).step(elapsed, input, state)
    }
}

/// Output of sequencing two schedules with [`ScheduleExt::and_then`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Either<L, R> {
    /// Produced by the first schedule.
    Left(L),
    /// Produced by the second schedule.
    Right(R),
}

/// Multiplies a duration by a non-negative factor, saturating at the largest
/// representable duration.
#[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
pub(crate) fn scale(duration: Duration, factor: f64) -> Duration {
    if factor.is_nan() || factor <= 0.0 {
        return Duration::ZERO;
    }
    let nanos = duration.as_nanos() as f64 * factor;
    if nanos >= u64::MAX as f64 {
        Duration::from_nanos(u64::MAX)
    } else {
        Duration::from_nanos(nanos as u64)
    }
}

/// Runs a schedule to completion on a constant input, collecting the delays.
/// Stops early after `limit` steps for schedules that never finish.
#[cfg(test)]
pub(crate) fn delays<In, S: Schedule<In>>(schedule: &S, input: &In, limit: usize) -> Vec<Duration> {
    let mut state = schedule.initial();
    let mut elapsed = Duration::ZERO;
    let mut out = Vec::new();
    while out.len() < limit {
        match schedule.step(elapsed, input, state) {
            Decision::Continue { delay, state: next, .. } => {
                elapsed = elapsed.saturating_add(delay);
                out.push(delay);
                state = next;
            }
            Decision::Done => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_saturates_and_clamps() {
        let second = Duration::from_secs(1);
        assert_eq!(scale(second, 2.5), Duration::from_millis(2_500));
        assert_eq!(scale(second, 0.0), Duration::ZERO);
        assert_eq!(scale(second, -3.0), Duration::ZERO);
        assert_eq!(scale(second, f64::NAN), Duration::ZERO);
        assert_eq!(scale(Duration::MAX, 10.0), Duration::from_nanos(u64::MAX));
        assert_eq!(scale(second, f64::INFINITY), Duration::from_nanos(u64::MAX));
    }

    #[test]
    fn decision_helpers() {
        let d: Decision<u8, &str> = Decision::Continue {
            delay: Duration::from_millis(5),
            state: 1,
            output: "x",
        };
        assert!(d.is_continue());
        assert_eq!(d.delay(), Some(Duration::from_millis(5)));
        assert_eq!(
            d.map_output(str::len).map_state(|s| s + 1),
            Decision::Continue {
                delay: Duration::from_millis(5),
                state: 2,
                output: 1
            }
        );
        assert_eq!(Decision::<u8, u8>::Done.delay(), None);
    }
}
