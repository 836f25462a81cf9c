//! Time sources and the timer driver.
//!
//! The driver pairs a [`TimeSource`] with a [`TimerHeap`]. Sleeping fibers
//! register a deadline and a waker; the scheduler calls
//! [`TimerDriver::process_timers`] from its run loop to wake the ones that
//! are due.

use crate::runtime::timer::{TimerHeap, TimerKey};
use crate::types::Time;
use crate::types::id::duration_to_nanos;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::Waker;
use std::time::{Duration, Instant};

/// Time source abstraction for getting the current time.
///
/// Allows the runtime to work with both wall clock time (production) and
/// virtual time (tests).
pub trait TimeSource: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Time;
}

/// Wall clock time source.
///
/// The epoch is the moment this source was created.
#[derive(Debug)]
pub struct WallClock {
    epoch: Instant,
}

impl WallClock {
    /// Creates a new wall clock time source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Time {
        Time::from_nanos(duration_to_nanos(self.epoch.elapsed()))
    }
}

/// Virtual time source.
///
/// Time only moves when someone advances it. A current-thread runtime
/// built with virtual time advances it to the next timer deadline whenever
/// no fiber is runnable.
///
/// ```
/// use effectus::time::{TimeSource, VirtualClock};
/// use effectus::Time;
///
/// let clock = VirtualClock::new();
/// clock.advance(std::time::Duration::from_secs(1));
/// assert_eq!(clock.now(), Time::from_secs(1));
/// ```
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: AtomicU64,
}

impl VirtualClock {
    /// Creates a new virtual clock starting at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a virtual clock starting at the given time.
    #[must_use]
    pub fn starting_at(time: Time) -> Self {
        Self {
            now: AtomicU64::new(time.as_nanos()),
        }
    }

    /// Advances time by `by`.
    pub fn advance(&self, by: Duration) {
        let nanos = duration_to_nanos(by);
        let _ = self
            .now
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_add(nanos))
            });
    }

    /// Advances time to `time`. Never moves the clock backwards.
    pub fn advance_to(&self, time: Time) {
        self.now.fetch_max(time.as_nanos(), Ordering::AcqRel);
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Time {
        Time::from_nanos(self.now.load(Ordering::Acquire))
    }
}

/// Timer driver that manages sleep registrations and fires them.
pub struct TimerDriver {
    clock: Arc<dyn TimeSource>,
    timers: Mutex<TimerHeap>,
}

impl fmt::Debug for TimerDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerDriver")
            .field("now", &self.now())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl TimerDriver {
    /// Creates a driver reading time from `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            clock,
            timers: Mutex::new(TimerHeap::new()),
        }
    }

    /// Returns the current time of the underlying clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.clock.now()
    }

    /// Registers a waker for `deadline`.
    pub fn register(&self, deadline: Time, waker: Waker) -> TimerKey {
        self.timers.lock().insert(deadline, waker)
    }

    /// Refreshes the waker of an existing registration, re-registering if the
    /// timer already fired.
    pub fn update(&self, key: TimerKey, deadline: Time, waker: &Waker) -> TimerKey {
        let mut timers = self.timers.lock();
        if timers.update_waker(key, waker) {
            key
        } else {
            timers.insert(deadline, waker.clone())
        }
    }

    /// Cancels a registration.
    pub fn cancel(&self, key: TimerKey) -> bool {
        self.timers.lock().cancel(key)
    }

    /// Returns the earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Time> {
        self.timers.lock().peek_deadline()
    }

    /// Wakes every timer that is due. Returns how many were woken.
    pub fn process_timers(&self) -> usize {
        let now = self.now();
        let expired = self.timers.lock().pop_expired(now);
        let count = expired.len();
        for waker in expired {
            waker.wake();
        }
        count
    }

    /// Drops every registration.
    pub fn clear(&self) {
        self.timers.lock().clear();
    }

    /// Returns the number of pending timers.
    pub fn pending_count(&self) -> usize {
        self.timers.lock().len()
    }
}
