//! Retrying and repeating effects under a schedule.

use super::{Effect, guarded};
use crate::fiber::FiberContext;
use crate::schedule::{Schedule, ScheduleDriver};
use crate::tracing_compat::{debug, trace};
use crate::types::{Cause, Exit, FiberId};
use std::sync::Arc;
use std::time::Duration;

/// Waits out a schedule delay. The wait is interruptible, and a pending
/// interruption is observed even when the delay is zero.
async fn pause(ctx: &FiberContext, delay: Duration) -> Result<(), FiberId> {
    ctx.sleep(delay).await?;
    ctx.checkpoint().map_or(Ok(()), Err)
}

/// How a retry loop ended without succeeding.
enum RetryEnd<E, O> {
    /// The schedule said `Done` after this cause; `O` is its last output.
    Exhausted(Cause<E>, Option<O>),
    /// The cause was not a plain typed failure, or the fiber was
    /// interrupted.
    Fatal(Cause<E>),
}

/// Runs `effect` until it succeeds, the schedule gives up, or a cause
/// arrives that retrying cannot fix.
async fn retry_loop<A, E, S>(
    effect: &Effect<A, E>,
    schedule: Arc<S>,
    ctx: &FiberContext,
) -> Result<A, RetryEnd<E, S::Output>>
where
    A: Send + 'static,
    E: Send + 'static,
    S: Schedule<Cause<E>> + ?Sized,
{
    let mut driver = ScheduleDriver::new(schedule, ctx.now());
    let mut attempt: u64 = 1;
    loop {
        let cause = match effect.run_in(ctx.clone()).await {
            Exit::Success(value) => return Ok(value),
            Exit::Failure(cause) => cause,
        };
        if !cause.is_recoverable() {
            trace!(fiber = %ctx.id(), attempt, "cause is not retryable");
            return Err(RetryEnd::Fatal(cause));
        }
        let Some(delay) = driver.next(ctx.now(), &cause) else {
            debug!(fiber = %ctx.id(), attempt, "retry schedule exhausted");
            return Err(RetryEnd::Exhausted(cause, driver.into_output()));
        };
        debug!(fiber = %ctx.id(), attempt, delay = ?delay, "retrying after failure");
        if let Err(by) = pause(ctx, delay).await {
            return Err(RetryEnd::Fatal(Cause::interrupt(by)));
        }
        attempt += 1;
    }
}

impl<A, E> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    /// Re-runs `self` after typed failures for as long as `schedule`
    /// continues.
    ///
    /// The schedule sees each failure's cause and the time since the first
    /// attempt. Defects and interruptions are never retried. When the
    /// schedule is done the last cause propagates unchanged.
    ///
    /// ```
    /// use effectus::{Effect, RuntimeBuilder, schedule};
    /// use std::sync::Arc;
    /// use std::sync::atomic::{AtomicU32, Ordering};
    ///
    /// let attempts = Arc::new(AtomicU32::new(0));
    /// let counter = Arc::clone(&attempts);
    /// let flaky = Effect::try_sync(move || match counter.fetch_add(1, Ordering::SeqCst) {
    ///     0 | 1 => Err("not yet"),
    ///     n => Ok(n + 1),
    /// });
    /// let rt = RuntimeBuilder::current_thread().build().unwrap();
    /// assert_eq!(rt.run(flaky.retry(schedule::recurs(5))).value(), Some(&3));
    /// ```
    #[must_use]
    pub fn retry<S>(self, schedule: S) -> Self
    where
        S: Schedule<Cause<E>> + 'static,
    {
        let schedule = Arc::new(schedule);
        Self::from_fn(move |ctx: FiberContext| {
            let effect = self.clone();
            let schedule = Arc::clone(&schedule);
            async move {
                match retry_loop(&effect, schedule, &ctx).await {
                    Ok(value) => Exit::Success(value),
                    Err(RetryEnd::Exhausted(cause, _) | RetryEnd::Fatal(cause)) => {
                        Exit::Failure(cause)
                    }
                }
            }
        })
    }

    /// Like [`retry`](Self::retry), but once the schedule is done runs
    /// `fallback` with the last cause and the schedule's last output.
    ///
    /// Causes that are never retried do not reach the fallback.
    #[must_use]
    pub fn retry_or_else<S, F>(self, schedule: S, fallback: F) -> Self
    where
        S: Schedule<Cause<E>> + 'static,
        F: Fn(Cause<E>, Option<S::Output>) -> Self + Send + Sync + 'static,
    {
        let schedule = Arc::new(schedule);
        let fallback = Arc::new(fallback);
        Self::from_fn(move |ctx: FiberContext| {
            let effect = self.clone();
            let schedule = Arc::clone(&schedule);
            let fallback = Arc::clone(&fallback);
            async move {
                match retry_loop(&effect, schedule, &ctx).await {
                    Ok(value) => Exit::Success(value),
                    Err(RetryEnd::Fatal(cause)) => Exit::Failure(cause),
                    Err(RetryEnd::Exhausted(cause, output)) => {
                        let next = guarded(|| fallback(cause, output));
                        match next {
                            Ok(next) => next.run_in(ctx).await,
                            Err(defect) => Exit::die(defect),
                        }
                    }
                }
            }
        })
    }

    /// Runs `self`, then keeps re-running it after each success for as long
    /// as `schedule` continues. Returns the last success; the first failure
    /// stops the loop.
    ///
    /// The effect always runs once more than the number of recurrences the
    /// schedule grants.
    #[must_use]
    pub fn repeat<S>(self, schedule: S) -> Self
    where
        S: Schedule<A> + 'static,
    {
        let schedule = Arc::new(schedule);
        Self::from_fn(move |ctx: FiberContext| {
            let effect = self.clone();
            let schedule = Arc::clone(&schedule);
            async move {
                let mut driver = ScheduleDriver::new(schedule, ctx.now());
                loop {
                    let value = match effect.run_in(ctx.clone()).await {
                        Exit::Success(value) => value,
                        failed @ Exit::Failure(_) => return failed,
                    };
                    let Some(delay) = driver.next(ctx.now(), &value) else {
                        trace!(fiber = %ctx.id(), runs = driver.steps() + 1, "repeat finished");
                        return Exit::Success(value);
                    };
                    if let Err(by) = pause(&ctx, delay).await {
                        return Exit::interrupt(by);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{ScheduleExt, recurs, spaced};
    use crate::test_utils::run_test;
    use crate::types::Time;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with `attempt-N` for the first `failures` runs, then succeeds
    /// with the attempt number.
    fn flaky(failures: u32) -> (Effect<u32, String>, Arc<AtomicU32>) {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let effect = Effect::try_sync(move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= failures {
                Err(format!("attempt-{attempt}"))
            } else {
                Ok(attempt)
            }
        });
        (effect, attempts)
    }

    #[test]
    fn retry_succeeds_within_budget() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("retry_succeeds_within_budget");

        let (effect, attempts) = flaky(2);
        crate::assert_exit_success!(run_test(effect.retry(recurs(5))), 3);
        let runs = attempts.load(Ordering::SeqCst);
        crate::assert_with_log!(runs == 3, "three attempts", 3, runs);
        crate::test_complete!("retry_succeeds_within_budget");
    }

    #[test]
    fn exhausted_retry_keeps_last_cause() {
        let (effect, attempts) = flaky(2);
        assert_eq!(
            run_test(effect.retry(recurs(1))),
            Exit::fail("attempt-2".to_string())
        );
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn intersect_and_union_bound_attempts() {
        let (effect, attempts) = flaky(10);
        let _ = run_test(effect.retry(recurs(3).intersect(recurs(5))));
        assert_eq!(attempts.load(Ordering::SeqCst), 4, "initial run plus 3 retries");

        let (effect, attempts) = flaky(10);
        let _ = run_test(effect.retry(recurs(3).union(recurs(5))));
        assert_eq!(attempts.load(Ordering::SeqCst), 6, "initial run plus 5 retries");
    }

    #[test]
    fn defects_are_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let effect = Effect::<(), String>::sync(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            panic!("broken invariant");
        });
        let cause = crate::assert_exit_failure!(run_test(effect.retry(recurs(5))));
        assert!(cause.is_die());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delays_come_from_the_schedule() {
        let (effect, _) = flaky(3);
        let timed = effect.retry(spaced(Duration::from_millis(250))).zip(Effect::now());
        crate::assert_exit_success!(run_test(timed), (4, Time::from_millis(750)));
    }

    #[test]
    fn schedule_sees_the_cause() {
        let (effect, attempts) = flaky(10);
        let policy = recurs(10).while_input(|cause: &Cause<String>| {
            cause.first_failure().is_some_and(|e| e != "attempt-3")
        });
        assert_eq!(
            run_test(effect.retry(policy)),
            Exit::fail("attempt-3".to_string())
        );
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_or_else_runs_fallback_on_exhaustion() {
        let (effect, _) = flaky(10);
        let recovered = effect.retry_or_else(recurs(2), |cause, output| {
            let last = cause.first_failure().cloned().unwrap_or_default();
            Effect::succeed(format!("{last} after {output:?}").len() as u32)
        });
        crate::assert_exit_success!(run_test(recovered), "attempt-3 after Some(2)".len() as u32);
    }

    #[test]
    fn interruption_during_delay_stops_retrying() {
        let rt = crate::test_utils::test_runtime();
        let (effect, attempts) = flaky(10);
        let fiber = rt.fork(effect.retry(spaced(Duration::from_secs(60))));
        let stopper = rt.fork(
            Effect::<(), ()>::sleep(Duration::from_secs(90)).zip_right(fiber.interrupt::<()>()),
        );
        let Exit::Success(exit) = rt.await_fiber(&stopper) else {
            panic!("stopper failed");
        };
        let cause = crate::assert_exit_failure!(exit);
        assert!(cause.is_interrupted_only());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn repeat_returns_last_value() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("repeat_returns_last_value");

        let runs = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&runs);
        let effect = Effect::<u32, ()>::sync(move || counter.fetch_add(1, Ordering::SeqCst) + 1);
        crate::assert_exit_success!(run_test(effect.repeat(recurs(3))), 4);
        assert_eq!(runs.load(Ordering::SeqCst), 4);
        crate::test_complete!("repeat_returns_last_value");
    }

    #[test]
    fn repeat_stops_on_failure_and_on_input() {
        let (effect, attempts) = flaky(0);
        let until_three = effect.repeat(recurs(100).while_input(|n: &u32| *n < 3));
        crate::assert_exit_success!(run_test(until_three), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        let failing = Effect::<u32, &str>::fail("stop").repeat(recurs(5));
        assert_eq!(run_test(failing), Exit::fail("stop"));
    }
}
