//! Stepping a schedule against a clock.

use super::{Decision, Schedule};
use crate::types::Time;
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

/// A schedule together with the state of one loop and the time that loop
/// started.
///
/// Retry and repeat loops drive their schedule through a driver. It is also
/// usable directly by code that paces its own work:
///
/// ```
/// use effectus::schedule::{self, ScheduleDriver};
/// use effectus::Time;
/// use std::time::Duration;
///
/// let mut driver = ScheduleDriver::new(schedule::spaced(Duration::from_secs(1)), Time::ZERO);
/// assert_eq!(driver.next(Time::ZERO, &()), Some(Duration::from_secs(1)));
/// assert_eq!(driver.output(), Some(&1));
/// ```
pub struct ScheduleDriver<In, S: Schedule<In>> {
    schedule: S,
    state: Option<S::State>,
    output: Option<S::Output>,
    started: Time,
    steps: u64,
    input: PhantomData<fn(&In)>,
}

impl<In, S: Schedule<In>> fmt::Debug for ScheduleDriver<In, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleDriver")
            .field("started", &self.started)
            .field("steps", &self.steps)
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}

impl<In, S: Schedule<In>> ScheduleDriver<In, S> {
    /// Starts a loop at `now`.
    pub fn new(schedule: S, now: Time) -> Self {
        let state = schedule.initial();
        Self {
            schedule,
            state: Some(state),
            output: None,
            started: now,
            steps: 0,
            input: PhantomData,
        }
    }

    /// Feeds `input` to the schedule. Returns the delay before the next
    /// attempt, or `None` once the schedule is done. A finished driver stays
    /// finished until [`reset`](Self::reset).
    pub fn next(&mut self, now: Time, input: &In) -> Option<Duration> {
        let state = self.state.take()?;
        match self.schedule.step(self.elapsed(now), input, state) {
            Decision::Continue {
                delay,
                state,
                output,
            } => {
                self.state = Some(state);
                self.output = Some(output);
                self.steps += 1;
                Some(delay)
            }
            Decision::Done => None,
        }
    }

    /// Time since the loop started.
    pub fn elapsed(&self, now: Time) -> Duration {
        now.duration_since(self.started)
    }

    /// Output of the last continuing step.
    pub fn output(&self) -> Option<&S::Output> {
        self.output.as_ref()
    }

    /// Consumes the driver, returning the output of the last continuing
    /// step.
    pub fn into_output(self) -> Option<S::Output> {
        self.output
    }

    /// Number of continuing steps so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Returns true once the schedule has said `Done`.
    pub fn is_done(&self) -> bool {
        self.state.is_none()
    }

    /// Starts a fresh loop at `now`.
    pub fn reset(&mut self, now: Time) {
        self.state = Some(self.schedule.initial());
        self.output = None;
        self.started = now;
        self.steps = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{ScheduleExt, during, recurs, spaced};

    #[test]
    fn driver_stops_and_stays_stopped() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("driver_stops_and_stays_stopped");

        let mut driver = ScheduleDriver::new(recurs(2), Time::ZERO);
        assert_eq!(driver.next(Time::ZERO, &()), Some(Duration::ZERO));
        assert_eq!(driver.next(Time::ZERO, &()), Some(Duration::ZERO));
        assert_eq!(driver.next(Time::ZERO, &()), None);
        assert!(driver.is_done());
        assert_eq!(driver.next(Time::ZERO, &()), None);
        assert_eq!(driver.steps(), 2);

        driver.reset(Time::from_secs(1));
        assert!(!driver.is_done());
        assert_eq!(driver.steps(), 0);
        crate::test_complete!("driver_stops_and_stays_stopped");
    }

    #[test]
    fn elapsed_is_measured_from_the_start() {
        let mut driver = ScheduleDriver::new(during(Duration::from_secs(5)), Time::from_secs(10));
        assert!(driver.next(Time::from_secs(12), &()).is_some());
        assert_eq!(driver.output(), Some(&Duration::from_secs(2)));
        assert_eq!(driver.next(Time::from_secs(15), &()), None);
    }

    #[test]
    fn outputs_follow_combinators() {
        let mut driver = ScheduleDriver::new(
            spaced(Duration::from_millis(3)).intersect(recurs(1)),
            Time::ZERO,
        );
        assert_eq!(driver.next(Time::ZERO, &"input"), Some(Duration::ZERO));
        assert_eq!(driver.output(), Some(&(1, 1)));
        assert_eq!(driver.next(Time::ZERO, &"input"), None);
    }
}
