//! Primitive schedules. All of them ignore their input.

use super::{Decision, Schedule, scale};
use std::time::Duration;

/// Recurs `times` times with no delay. Outputs the recurrence count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recurs {
    times: u64,
}

/// Recurs at most `times` times, immediately.
#[must_use]
pub const fn recurs(times: u64) -> Recurs {
    Recurs { times }
}

impl<In> Schedule<In> for Recurs {
    type State = u64;
    type Output = u64;

    fn initial(&self) -> u64 {
        0
    }

    fn step(&self, _: Duration, _: &In, count: u64) -> Decision<u64, u64> {
        if count >= self.times {
            return Decision::Done;
        }
        Decision::Continue {
            delay: Duration::ZERO,
            state: count + 1,
            output: count + 1,
        }
    }
}

/// Recurs forever, waiting `interval` between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spaced {
    interval: Duration,
}

/// Recurs forever with a constant delay.
#[must_use]
pub const fn spaced(interval: Duration) -> Spaced {
    Spaced { interval }
}

impl<In> Schedule<In> for Spaced {
    type State = u64;
    type Output = u64;

    fn initial(&self) -> u64 {
        0
    }

    fn step(&self, _: Duration, _: &In, count: u64) -> Decision<u64, u64> {
        Decision::Continue {
            delay: self.interval,
            state: count.saturating_add(1),
            output: count.saturating_add(1),
        }
    }
}

/// Recurs forever on a fixed-rate grid of `interval`.
///
/// Each delay runs to the next multiple of `interval` since the loop
/// started. A slow attempt that overruns one or more boundaries does not
/// cause a burst of catch-up recurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixed {
    interval: Duration,
}

/// Recurs forever at a fixed rate.
#[must_use]
pub const fn fixed(interval: Duration) -> Fixed {
    Fixed { interval }
}

impl<In> Schedule<In> for Fixed {
    type State = u64;
    type Output = u64;

    fn initial(&self) -> u64 {
        0
    }

    fn step(&self, elapsed: Duration, _: &In, count: u64) -> Decision<u64, u64> {
        let interval = self.interval.as_nanos();
        let delay = if interval == 0 {
            Duration::ZERO
        } else {
            let elapsed = elapsed.as_nanos();
            let next_boundary = (elapsed / interval + 1) * interval;
            let gap = next_boundary - elapsed;
            Duration::from_nanos(u64::try_from(gap).unwrap_or(u64::MAX))
        };
        Decision::Continue {
            delay,
            state: count.saturating_add(1),
            output: count.saturating_add(1),
        }
    }
}

/// Recurs forever with delays `base * factor^n`. Outputs the delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Exponential {
    base: Duration,
    factor: f64,
}

/// Exponential backoff starting at `base`.
#[must_use]
pub const fn exponential(base: Duration, factor: f64) -> Exponential {
    Exponential { base, factor }
}

impl<In> Schedule<In> for Exponential {
    type State = i32;
    type Output = Duration;

    fn initial(&self) -> i32 {
        0
    }

    fn step(&self, _: Duration, _: &In, n: i32) -> Decision<i32, Duration> {
        let delay = scale(self.base, self.factor.powi(n));
        Decision::Continue {
            delay,
            state: n.saturating_add(1),
            output: delay,
        }
    }
}

/// Recurs forever with delays following the Fibonacci sequence scaled by
/// `one`. Outputs the delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fibonacci {
    one: Duration,
}

/// Fibonacci backoff: `one, one, 2*one, 3*one, 5*one, ...`.
#[must_use]
pub const fn fibonacci(one: Duration) -> Fibonacci {
    Fibonacci { one }
}

impl<In> Schedule<In> for Fibonacci {
    type State = (Duration, Duration);
    type Output = Duration;

    fn initial(&self) -> Self::State {
        (self.one, self.one)
    }

    fn step(&self, _: Duration, _: &In, (a, b): Self::State) -> Decision<Self::State, Duration> {
        Decision::Continue {
            delay: a,
            state: (b, a.saturating_add(b)),
            output: a,
        }
    }
}

/// Recurs forever with no delay. Outputs the recurrence count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Forever;

/// Recurs forever, immediately.
#[must_use]
pub const fn forever() -> Forever {
    Forever
}

impl<In> Schedule<In> for Forever {
    type State = u64;
    type Output = u64;

    fn initial(&self) -> u64 {
        0
    }

    fn step(&self, _: Duration, _: &In, count: u64) -> Decision<u64, u64> {
        Decision::Continue {
            delay: Duration::ZERO,
            state: count.saturating_add(1),
            output: count.saturating_add(1),
        }
    }
}

/// Recurs exactly once, immediately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Once;

/// A single immediate recurrence.
#[must_use]
pub const fn once() -> Once {
    Once
}

impl<In> Schedule<In> for Once {
    type State = bool;
    type Output = ();

    fn initial(&self) -> bool {
        false
    }

    fn step(&self, _: Duration, _: &In, fired: bool) -> Decision<bool, ()> {
        if fired {
            Decision::Done
        } else {
            Decision::Continue {
                delay: Duration::ZERO,
                state: true,
                output: (),
            }
        }
    }
}

/// Recurs immediately while less than `limit` has elapsed since the loop
/// started. Outputs the elapsed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct During {
    limit: Duration,
}

/// Recurs for as long as the loop has run less than `limit`.
#[must_use]
pub const fn during(limit: Duration) -> During {
    During { limit }
}

impl<In> Schedule<In> for During {
    type State = ();
    type Output = Duration;

    fn initial(&self) {}

    fn step(&self, elapsed: Duration, _: &In, (): ()) -> Decision<(), Duration> {
        if elapsed < self.limit {
            Decision::Continue {
                delay: Duration::ZERO,
                state: (),
                output: elapsed,
            }
        } else {
            Decision::Done
        }
    }
}
