//! Schedule combinators.
//!
//! Every combinator carries the input type as a phantom parameter so that
//! the input of a composed schedule is inferred from where it is used, such
//! as the error type of the effect being retried.

use super::{Decision, Either, Schedule, scale};
use crate::util::{DetRng, os_seed};
use std::marker::PhantomData;
use std::time::Duration;

type Input<In> = PhantomData<fn(&In)>;

/// Builder methods available on every schedule.
pub trait ScheduleExt<In>: Schedule<In> + Sized {
    /// AND: continues only while both continue, waiting the smaller of the
    /// two delays. Outputs both outputs.
    fn intersect<B: Schedule<In>>(self, other: B) -> Intersect<Self, B, In> {
        Intersect {
            left: self,
            right: other,
            input: PhantomData,
        }
    }

    /// OR: continues while either continues, waiting the smaller of the
    /// continuing delays. A side that finished reports `None`.
    fn union<B: Schedule<In>>(self, other: B) -> Union<Self, B, In> {
        Union {
            left: self,
            right: other,
            input: PhantomData,
        }
    }

    /// Runs `self` until it finishes, then `next` from its initial state.
    fn and_then<B: Schedule<In>>(self, next: B) -> AndThen<Self, B, In> {
        AndThen {
            first: self,
            second: next,
            input: PhantomData,
        }
    }

    /// Transforms the output.
    fn map<O, F>(self, f: F) -> MapOutput<Self, F, In>
    where
        O: Send,
        F: Fn(Self::Output) -> O + Send + Sync,
    {
        MapOutput {
            inner: self,
            f,
            input: PhantomData,
        }
    }

    /// Continues only while `predicate` holds for the input.
    fn while_input<P>(self, predicate: P) -> WhileInput<Self, P, In>
    where
        P: Fn(&In) -> bool + Send + Sync,
    {
        WhileInput {
            inner: self,
            predicate,
            input: PhantomData,
        }
    }

    /// Stops as soon as `predicate` holds for the input.
    fn until_input<P>(self, predicate: P) -> UntilInput<Self, P, In>
    where
        P: Fn(&In) -> bool + Send + Sync,
    {
        UntilInput {
            inner: self,
            predicate,
            input: PhantomData,
        }
    }

    /// Continues only while `predicate` holds for the output.
    fn while_output<P>(self, predicate: P) -> WhileOutput<Self, P, In>
    where
        P: Fn(&Self::Output) -> bool + Send + Sync,
    {
        WhileOutput {
            inner: self,
            predicate,
            input: PhantomData,
        }
    }

    /// Stops once `limit` has elapsed since the loop started.
    fn up_to(self, limit: Duration) -> UpTo<Self, In> {
        UpTo {
            inner: self,
            limit,
            input: PhantomData,
        }
    }

    /// Stops after at most `max` recurrences, keeping the delays of `self`.
    fn max_recurrences(self, max: u64) -> MaxRecurrences<Self, In> {
        MaxRecurrences {
            inner: self,
            max,
            input: PhantomData,
        }
    }

    /// Scales every delay by a random factor in `[0.8, 1.2)`, seeded from
    /// the operating system per loop.
    fn jittered(self) -> Jittered<Self, In> {
        Jittered {
            inner: self,
            seed: None,
            input: PhantomData,
        }
    }

    /// Like [`jittered`](Self::jittered) with a fixed seed, for
    /// reproducible delays.
    fn jittered_with_seed(self, seed: u64) -> Jittered<Self, In> {
        Jittered {
            inner: self,
            seed: Some(seed),
            input: PhantomData,
        }
    }
}

impl<In, S: Schedule<In>> ScheduleExt<In> for S {}

/// See [`ScheduleExt::intersect`].
#[derive(Debug, Clone)]
pub struct Intersect<A, B, In> {
    left: A,
    right: B,
    input: Input<In>,
}

impl<In, A, B> Schedule<In> for Intersect<A, B, In>
where
    A: Schedule<In>,
    B: Schedule<In>,
{
    type State = (A::State, B::State);
    type Output = (A::Output, B::Output);

    fn initial(&self) -> Self::State {
        (self.left.initial(), self.right.initial())
    }

    fn step(&self, elapsed: Duration, input: &In, (l, r): Self::State) -> Decision<Self::State, Self::Output> {
        let left = self.left.step(elapsed, input, l);
        let Decision::Continue {
            delay: l_delay,
            state: l_state,
            output: l_out,
        } = left
        else {
            return Decision::Done;
        };
        match self.right.step(elapsed, input, r) {
            Decision::Continue {
                delay: r_delay,
                state: r_state,
                output: r_out,
            } => Decision::Continue {
                delay: l_delay.min(r_delay),
                state: (l_state, r_state),
                output: (l_out, r_out),
            },
            Decision::Done => Decision::Done,
        }
    }
}

/// See [`ScheduleExt::union`].
#[derive(Debug, Clone)]
pub struct Union<A, B, In> {
    left: A,
    right: B,
    input: Input<In>,
}

/// Steps one side of a union. A side that already finished stays finished.
fn step_side<In, S: Schedule<In>>(
    schedule: &S,
    elapsed: Duration,
    input: &In,
    state: Option<S::State>,
) -> Option<(Duration, S::State, S::Output)> {
    match schedule.step(elapsed, input, state?) {
        Decision::Continue {
            delay,
            state,
            output,
        } => Some((delay, state, output)),
        Decision::Done => None,
    }
}

impl<In, A, B> Schedule<In> for Union<A, B, In>
where
    A: Schedule<In>,
    B: Schedule<In>,
{
    type State = (Option<A::State>, Option<B::State>);
    type Output = (Option<A::Output>, Option<B::Output>);

    fn initial(&self) -> Self::State {
        (Some(self.left.initial()), Some(self.right.initial()))
    }

    fn step(&self, elapsed: Duration, input: &In, (l, r): Self::State) -> Decision<Self::State, Self::Output> {
        let left = step_side(&self.left, elapsed, input, l);
        let right = step_side(&self.right, elapsed, input, r);
        let delay = match (&left, &right) {
            (None, None) => return Decision::Done,
            (Some((l, ..)), Some((r, ..))) => (*l).min(*r),
            (Some((d, ..)), None) | (None, Some((d, ..))) => *d,
        };
        let (l_state, l_out) = left.map(|(_, s, o)| (s, o)).unzip();
        let (r_state, r_out) = right.map(|(_, s, o)| (s, o)).unzip();
        Decision::Continue {
            delay,
            state: (l_state, r_state),
            output: (l_out, r_out),
        }
    }
}

/// See [`ScheduleExt::and_then`].
#[derive(Debug, Clone)]
pub struct AndThen<A, B, In> {
    first: A,
    second: B,
    input: Input<In>,
}

impl<In, A, B> Schedule<In> for AndThen<A, B, In>
where
    A: Schedule<In>,
    B: Schedule<In>,
{
    type State = Either<A::State, B::State>;
    type Output = Either<A::Output, B::Output>;

    fn initial(&self) -> Self::State {
        Either::Left(self.first.initial())
    }

    fn step(&self, elapsed: Duration, input: &In, state: Self::State) -> Decision<Self::State, Self::Output> {
        let second = match state {
            Either::Left(first) => match self.first.step(elapsed, input, first) {
                Decision::Done => self.second.initial(),
                decision => return decision.map_state(Either::Left).map_output(Either::Left),
            },
            Either::Right(second) => second,
        };
        self.second
            .step(elapsed, input, second)
            .map_state(Either::Right)
            .map_output(Either::Right)
    }
}

/// See [`ScheduleExt::map`].
#[derive(Clone)]
pub struct MapOutput<S, F, In> {
    inner: S,
    f: F,
    input: Input<In>,
}

impl<In, S, F, O> Schedule<In> for MapOutput<S, F, In>
where
    S: Schedule<In>,
    O: Send,
    F: Fn(S::Output) -> O + Send + Sync,
{
    type State = S::State;
    type Output = O;

    fn initial(&self) -> Self::State {
        self.inner.initial()
    }

    fn step(&self, elapsed: Duration, input: &In, state: Self::State) -> Decision<Self::State, O> {
        self.inner.step(elapsed, input, state).map_output(&self.f)
    }
}

/// See [`ScheduleExt::while_input`].
#[derive(Clone)]
pub struct WhileInput<S, P, In> {
    inner: S,
    predicate: P,
    input: Input<In>,
}

impl<In, S, P> Schedule<In> for WhileInput<S, P, In>
where
    S: Schedule<In>,
    P: Fn(&In) -> bool + Send + Sync,
{
    type State = S::State;
    type Output = S::Output;

    fn initial(&self) -> Self::State {
        self.inner.initial()
    }

    fn step(&self, elapsed: Duration, input: &In, state: Self::State) -> Decision<Self::State, Self::Output> {
        if (self.predicate)(input) {
            self.inner.step(elapsed, input, state)
        } else {
            Decision::Done
        }
    }
}

/// See [`ScheduleExt::until_input`].
#[derive(Clone)]
pub struct UntilInput<S, P, In> {
    inner: S,
    predicate: P,
    input: Input<In>,
}

impl<In, S, P> Schedule<In> for UntilInput<S, P, In>
where
    S: Schedule<In>,
    P: Fn(&In) -> bool + Send + Sync,
{
    type State = S::State;
    type Output = S::Output;

    fn initial(&self) -> Self::State {
        self.inner.initial()
    }

    fn step(&self, elapsed: Duration, input: &In, state: Self::State) -> Decision<Self::State, Self::Output> {
        if (self.predicate)(input) {
            Decision::Done
        } else {
            self.inner.step(elapsed, input, state)
        }
    }
}

/// See [`ScheduleExt::while_output`].
#[derive(Clone)]
pub struct WhileOutput<S, P, In> {
    inner: S,
    predicate: P,
    input: Input<In>,
}

impl<In, S, P> Schedule<In> for WhileOutput<S, P, In>
where
    S: Schedule<In>,
    P: Fn(&S::Output) -> bool + Send + Sync,
{
    type State = S::State;
    type Output = S::Output;

    fn initial(&self) -> Self::State {
        self.inner.initial()
    }

    fn step(&self, elapsed: Duration, input: &In, state: Self::State) -> Decision<Self::State, Self::Output> {
        match self.inner.step(elapsed, input, state) {
            Decision::Continue { output, .. } if !(self.predicate)(&output) => Decision::Done,
            decision => decision,
        }
    }
}

/// See [`ScheduleExt::up_to`].
#[derive(Debug, Clone)]
pub struct UpTo<S, In> {
    inner: S,
    limit: Duration,
    input: Input<In>,
}

impl<In, S: Schedule<In>> Schedule<In> for UpTo<S, In> {
    type State = S::State;
    type Output = S::Output;

    fn initial(&self) -> Self::State {
        self.inner.initial()
    }

    fn step(&self, elapsed: Duration, input: &In, state: Self::State) -> Decision<Self::State, Self::Output> {
        if elapsed >= self.limit {
            return Decision::Done;
        }
        self.inner.step(elapsed, input, state)
    }
}

/// See [`ScheduleExt::max_recurrences`].
#[derive(Debug, Clone)]
pub struct MaxRecurrences<S, In> {
    inner: S,
    max: u64,
    input: Input<In>,
}

impl<In, S: Schedule<In>> Schedule<In> for MaxRecurrences<S, In> {
    type State = (S::State, u64);
    type Output = S::Output;

    fn initial(&self) -> Self::State {
        (self.inner.initial(), 0)
    }

    fn step(&self, elapsed: Duration, input: &In, (state, count): Self::State) -> Decision<Self::State, Self::Output> {
        if count >= self.max {
            return Decision::Done;
        }
        self.inner
            .step(elapsed, input, state)
            .map_state(|state| (state, count + 1))
    }
}

/// See [`ScheduleExt::jittered`].
#[derive(Debug, Clone)]
pub struct Jittered<S, In> {
    inner: S,
    seed: Option<u64>,
    input: Input<In>,
}

const JITTER_LOW: f64 = 0.8;
const JITTER_HIGH: f64 = 1.2;

impl<In, S: Schedule<In>> Schedule<In> for Jittered<S, In> {
    type State = (S::State, DetRng);
    type Output = S::Output;

    fn initial(&self) -> Self::State {
        let seed = self.seed.unwrap_or_else(os_seed);
        (self.inner.initial(), DetRng::new(seed))
    }

    fn step(&self, elapsed: Duration, input: &In, (state, mut rng): Self::State) -> Decision<Self::State, Self::Output> {
        match self.inner.step(elapsed, input, state) {
            Decision::Continue {
                delay,
                state,
                output,
            } => {
                let factor = rng.next_in_range(JITTER_LOW, JITTER_HIGH);
                Decision::Continue {
                    delay: scale(delay, factor),
                    state: (state, rng),
                    output,
                }
            }
            Decision::Done => Decision::Done,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{delays, exponential, forever, recurs, spaced};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn intersect_stops_with_the_shorter() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("intersect_stops_with_the_shorter");

        let both = recurs(3).intersect(recurs(5));
        let count = delays(&both, &(), 100).len();
        crate::assert_with_log!(count == 3, "AND stops after 3", 3, count);
        crate::test_complete!("intersect_stops_with_the_shorter");
    }

    #[test]
    fn union_stops_with_the_longer() {
        let either = recurs(3).union(recurs(5));
        assert_eq!(delays(&either, &(), 100).len(), 5);
    }

    #[test]
    fn combined_delays_take_the_minimum() {
        let and = spaced(ms(10)).intersect(spaced(ms(30)));
        assert_eq!(delays(&and, &(), 2), vec![ms(10), ms(10)]);

        let or = spaced(ms(50)).max_recurrences(1).union(spaced(ms(20)).max_recurrences(3));
        assert_eq!(delays(&or, &(), 10), vec![ms(20), ms(20), ms(20)]);
    }

    #[test]
    fn and_then_switches_schedules() {
        let seq = spaced(ms(1)).max_recurrences(2).and_then(spaced(ms(7)).max_recurrences(2));
        assert_eq!(delays(&seq, &(), 10), vec![ms(1), ms(1), ms(7), ms(7)]);
    }

    #[test]
    fn map_transforms_output() {
        let schedule = recurs(2).map(|n: u64| n * 100);
        match schedule.step(Duration::ZERO, &(), schedule.initial()) {
            Decision::Continue { output, .. } => assert_eq!(output, 100),
            Decision::Done => panic!("recurs(2) continues"),
        }
    }

    #[test]
    fn input_predicates() {
        let retry_small = forever().while_input(|n: &u32| *n < 10);
        assert!(retry_small.step(Duration::ZERO, &3, 0).is_continue());
        assert!(!retry_small.step(Duration::ZERO, &30, 0).is_continue());

        let until_big = forever().until_input(|n: &u32| *n >= 10);
        assert!(until_big.step(Duration::ZERO, &3, 0).is_continue());
        assert!(!until_big.step(Duration::ZERO, &30, 0).is_continue());
    }

    #[test]
    fn while_output_caps_backoff() {
        let capped = exponential(ms(10), 2.0).while_output(|d: &Duration| *d <= ms(40));
        assert_eq!(delays(&capped, &(), 10), vec![ms(10), ms(20), ms(40)]);
    }

    #[test]
    fn up_to_bounds_elapsed_time() {
        let bounded = spaced(ms(10)).up_to(ms(35));
        assert_eq!(delays(&bounded, &(), 100).len(), 4);
    }

    #[test]
    fn seeded_jitter_is_reproducible_and_bounded() {
        let schedule = spaced(ms(100)).jittered_with_seed(99);
        let first = delays(&schedule, &(), 20);
        assert_eq!(first, delays(&schedule, &(), 20));
        for delay in first {
            assert!(delay >= ms(80) && delay < ms(120), "{delay:?}");
        }
    }

    #[test]
    fn unseeded_jitter_stays_in_range() {
        let schedule = spaced(ms(100)).jittered();
        for delay in delays(&schedule, &(), 20) {
            assert!(delay >= ms(80) && delay < ms(120), "{delay:?}");
        }
    }
}
