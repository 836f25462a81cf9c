//! Stream transformations. Each one wraps the upstream pull.

use super::{Pull, Stream};
use crate::effect::{Effect, guarded};
use crate::fiber::FiberContext;
use crate::types::Exit;
use parking_lot::Mutex;
use std::sync::Arc;

impl<T, E> Stream<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Transforms every value.
    #[must_use]
    pub fn map<U, F>(self, f: F) -> Stream<U, E>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Stream::from_pull(move || {
            let f = Arc::clone(&f);
            self.open().map(move |pull| pull.map(|value| f(value)))
        })
    }

    /// Keeps the values matching `predicate`. Chunks that end up empty are
    /// still emitted.
    #[must_use]
    pub fn filter<P>(self, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        Self::from_pull(move || {
            let predicate = Arc::clone(&predicate);
            self.open().map(move |pull| match pull {
                Pull::Emit(mut chunk) => {
                    chunk.retain(|value| predicate(value));
                    Pull::Emit(chunk)
                }
                Pull::End => Pull::End,
            })
        })
    }

    /// Emits at most `n` values, then ends without pulling upstream again.
    #[must_use]
    pub fn take(self, n: usize) -> Self {
        Self::from_pull(move || {
            let upstream = self.open();
            let remaining = Arc::new(Mutex::new(n));
            Effect::from_fn(move |ctx: FiberContext| {
                let upstream = upstream.clone();
                let remaining = Arc::clone(&remaining);
                async move {
                    if *remaining.lock() == 0 {
                        return Exit::Success(Pull::End);
                    }
                    match upstream.run_in(ctx).await {
                        Exit::Success(Pull::Emit(mut chunk)) => {
                            let mut left = remaining.lock();
                            chunk.truncate(*left);
                            *left -= chunk.len();
                            Exit::Success(Pull::Emit(chunk))
                        }
                        other => other,
                    }
                }
            })
        })
    }

    /// Runs `f` on every value, in order, and emits the results.
    #[must_use]
    pub fn map_effect<U, F>(self, f: F) -> Stream<U, E>
    where
        U: Send + 'static,
        F: Fn(T) -> Effect<U, E> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Stream::from_pull(move || {
            let upstream = self.open();
            let f = Arc::clone(&f);
            Effect::from_fn(move |ctx: FiberContext| {
                let upstream = upstream.clone();
                let f = Arc::clone(&f);
                async move {
                    let chunk = match upstream.run_in(ctx.clone()).await {
                        Exit::Success(Pull::Emit(chunk)) => chunk,
                        Exit::Success(Pull::End) => return Exit::Success(Pull::End),
                        Exit::Failure(cause) => return Exit::Failure(cause),
                    };
                    let mut out = Vec::with_capacity(chunk.len());
                    for value in chunk {
                        let next = guarded(|| f(value));
                        let effect = match next {
                            Ok(effect) => effect,
                            Err(defect) => return Exit::die(defect),
                        };
                        match effect.run_in(ctx.clone()).await {
                            Exit::Success(mapped) => out.push(mapped),
                            Exit::Failure(cause) => return Exit::Failure(cause),
                        }
                    }
                    Exit::Success(Pull::Emit(out))
                }
            })
        })
    }

    /// Transforms the typed failure.
    #[must_use]
    pub fn map_error<E2, F>(self, f: F) -> Stream<T, E2>
    where
        E2: Send + 'static,
        F: Fn(E) -> E2 + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Stream::from_pull(move || {
            let f = Arc::clone(&f);
            self.open().map_error(move |error| f(error))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::run_test;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A stream of naturals that counts how many times it was pulled.
    fn counted() -> (Stream<u32, String>, Arc<AtomicU32>) {
        let pulls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&pulls);
        let stream = Stream::unfold(0_u32, move |n| {
            counter.fetch_add(1, Ordering::SeqCst);
            Some((n, n + 1))
        });
        (stream, pulls)
    }

    #[test]
    fn take_stops_pulling_upstream() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("take_stops_pulling_upstream");

        let (stream, pulls) = counted();
        crate::assert_exit_success!(run_test(stream.take(3).run_collect()), vec![0, 1, 2]);
        let seen = pulls.load(Ordering::SeqCst);
        crate::assert_with_log!(seen == 3, "upstream pulled once per value", 3, seen);
        crate::test_complete!("take_stops_pulling_upstream");
    }

    #[test]
    fn take_truncates_chunks() {
        let stream = Stream::<u32, ()>::from_iterable(0..10).take(4);
        crate::assert_exit_success!(run_test(stream.run_collect()), vec![0, 1, 2, 3]);
        let none = Stream::<u32, ()>::from_iterable(0..10).take(0);
        crate::assert_exit_success!(run_test(none.run_collect()), Vec::<u32>::new());
    }

    #[test]
    fn map_filter_compose() {
        let (stream, _) = counted();
        let odd_squares = stream.filter(|n| n % 2 == 1).map(|n| n * n).take(3);
        crate::assert_exit_success!(run_test(odd_squares.run_collect()), vec![1, 9, 25]);
    }

    #[test]
    fn map_effect_stops_at_first_failure() {
        let stream = Stream::<u32, String>::from_iterable([1, 2, 3, 4]).map_effect(|n| {
            if n == 3 {
                Effect::fail(format!("rejected {n}"))
            } else {
                Effect::succeed(n * 2)
            }
        });
        assert_eq!(
            run_test(stream.run_collect()),
            Exit::fail("rejected 3".to_string())
        );
    }

    #[test]
    fn map_error_rewrites_failures() {
        let stream = Stream::<u32, &str>::from_pull(|| Effect::fail("io")).map_error(str::len);
        assert_eq!(run_test(stream.run_drain()), Exit::fail(2));
    }
}
