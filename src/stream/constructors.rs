//! Stream sources.

use super::{Pull, Stream};
use crate::effect::{Effect, guarded};
use crate::fiber::FiberContext;
use crate::schedule::{Schedule, ScheduleDriver};
use crate::types::Exit;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Largest chunk [`Stream::from_iterable`] emits per pull.
pub const CHUNK_SIZE: usize = 64;

#[derive(Debug, Clone, Copy)]
enum Phase {
    Start,
    Wait(Duration),
    Done,
}

struct RepeatState<T, S: Schedule<T>> {
    phase: Phase,
    driver: Option<ScheduleDriver<T, Arc<S>>>,
}

impl<T, E> Stream<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// A stream that ends immediately.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_pull(|| Effect::sync(|| Pull::End))
    }

    /// A stream of the single value produced by `effect`.
    #[must_use]
    pub fn from_effect(effect: Effect<T, E>) -> Self {
        Self::unfold_effect(true, move |first| {
            if first {
                effect.clone().map(|value| Some((value, false)))
            } else {
                Effect::sync(|| None)
            }
        })
    }

    /// Emits the values of `items` in order, in chunks of at most
    /// [`CHUNK_SIZE`].
    #[must_use]
    pub fn from_iterable<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Clone + Sync,
    {
        let items: Arc<[T]> = items.into_iter().collect();
        Self::from_pull(move || {
            let items = Arc::clone(&items);
            let cursor = Mutex::new(0_usize);
            Effect::sync(move || {
                let mut pos = cursor.lock();
                if *pos >= items.len() {
                    return Pull::End;
                }
                let end = items.len().min(*pos + CHUNK_SIZE);
                let chunk = items[*pos..end].to_vec();
                *pos = end;
                Pull::Emit(chunk)
            })
        })
    }

    /// Emits one value per pull from a pure state machine. Ends when `f`
    /// returns `None`.
    #[must_use]
    pub fn unfold<S, F>(init: S, f: F) -> Self
    where
        S: Clone + Send + Sync + 'static,
        F: Fn(S) -> Option<(T, S)> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::from_pull(move || {
            let f = Arc::clone(&f);
            let state = Mutex::new(Some(init.clone()));
            Effect::sync(move || {
                let mut state = state.lock();
                let Some(current) = state.take() else {
                    return Pull::End;
                };
                match f(current) {
                    Some((value, next)) => {
                        *state = Some(next);
                        Pull::single(value)
                    }
                    None => Pull::End,
                }
            })
        })
    }

    /// Like [`unfold`](Self::unfold), but each step is an effect. A failed
    /// step fails the stream.
    #[must_use]
    pub fn unfold_effect<S, F>(init: S, f: F) -> Self
    where
        S: Clone + Send + Sync + 'static,
        F: Fn(S) -> Effect<Option<(T, S)>, E> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::from_pull(move || {
            let f = Arc::clone(&f);
            let state = Arc::new(Mutex::new(Some(init.clone())));
            Effect::from_fn(move |ctx: FiberContext| {
                let f = Arc::clone(&f);
                let state = Arc::clone(&state);
                async move {
                    let Some(current) = state.lock().take() else {
                        return Exit::Success(Pull::End);
                    };
                    let step = match guarded(|| f(current)) {
                        Ok(step) => step,
                        Err(defect) => return Exit::die(defect),
                    };
                    match step.run_in(ctx).await {
                        Exit::Success(Some((value, next))) => {
                            *state.lock() = Some(next);
                            Exit::Success(Pull::single(value))
                        }
                        Exit::Success(None) => Exit::Success(Pull::End),
                        Exit::Failure(cause) => Exit::Failure(cause),
                    }
                }
            })
        })
    }

    /// Emits the output of each schedule step after waiting out its delay.
    /// Ends when the schedule is done.
    ///
    /// The schedule's clock starts at the first pull.
    #[must_use]
    pub fn from_schedule<S>(schedule: S) -> Self
    where
        S: Schedule<(), Output = T> + 'static,
        T: Clone,
    {
        let schedule = Arc::new(schedule);
        Self::from_pull(move || {
            let schedule = Arc::clone(&schedule);
            let driver: Arc<Mutex<Option<ScheduleDriver<(), Arc<S>>>>> = Arc::default();
            Effect::from_fn(move |ctx: FiberContext| {
                let schedule = Arc::clone(&schedule);
                let driver = Arc::clone(&driver);
                async move {
                    let step = {
                        let mut slot = driver.lock();
                        let now = ctx.now();
                        let driver = slot.get_or_insert_with(|| ScheduleDriver::new(schedule, now));
                        driver
                            .next(now, &())
                            .and_then(|delay| driver.output().cloned().map(|out| (delay, out)))
                    };
                    let Some((delay, output)) = step else {
                        return Exit::Success(Pull::End);
                    };
                    match ctx.sleep(delay).await {
                        Ok(()) => Exit::Success(Pull::single(output)),
                        Err(by) => Exit::interrupt(by),
                    }
                }
            })
        })
    }

    /// Runs `effect` and emits its value, then keeps re-running it for as
    /// long as `schedule` continues. The schedule sees each value.
    ///
    /// A failed run fails the stream.
    #[must_use]
    pub fn repeat_effect_with<S>(effect: Effect<T, E>, schedule: S) -> Self
    where
        S: Schedule<T> + 'static,
    {
        let schedule = Arc::new(schedule);
        Self::from_pull(move || {
            let effect = effect.clone();
            let schedule = Arc::clone(&schedule);
            let state = Arc::new(Mutex::new(RepeatState::<T, S> {
                phase: Phase::Start,
                driver: None,
            }));
            Effect::from_fn(move |ctx: FiberContext| {
                let effect = effect.clone();
                let schedule = Arc::clone(&schedule);
                let state = Arc::clone(&state);
                async move {
                    let phase = state.lock().phase;
                    match phase {
                        Phase::Done => return Exit::Success(Pull::End),
                        Phase::Wait(delay) => {
                            if let Err(by) = ctx.sleep(delay).await {
                                return Exit::interrupt(by);
                            }
                        }
                        Phase::Start => {
                            state.lock().driver = Some(ScheduleDriver::new(schedule, ctx.now()));
                        }
                    }
                    let value = match effect.run_in(ctx.clone()).await {
                        Exit::Success(value) => value,
                        Exit::Failure(cause) => {
                            state.lock().phase = Phase::Done;
                            return Exit::Failure(cause);
                        }
                    };
                    let mut state = state.lock();
                    let now = ctx.now();
                    let next = state.driver.as_mut().and_then(|driver| driver.next(now, &value));
                    state.phase = next.map_or(Phase::Done, Phase::Wait);
                    Exit::Success(Pull::single(value))
                }
            })
        })
    }
}
