//! Sequential combinators, error handling and finalization.

use super::run_loop::{Next, Node, Value, downcast};
use super::{Effect, guarded, merge_finalizer};
use crate::fiber::FiberContext;
use crate::types::{Cause, Exit};
use std::any::Any;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Runs `f`, or turns its panic into a failed exit.
fn apply<T, A, E>(f: impl FnOnce() -> T, then: impl FnOnce(T) -> Exit<A, E>) -> Exit<A, E> {
    match guarded(f) {
        Ok(value) => then(value),
        Err(defect) => Exit::die(defect),
    }
}

/// A cause the error handler cannot see, rebased onto the handler's error
/// type. Typed failures mixed with defects or interruptions become defects.
fn unhandled<E, E2>(cause: Cause<E>) -> Cause<E2>
where
    E: fmt::Debug + Any + Send + Sync,
{
    cause.failures_into_defects()
}

/// Splits a cause into the typed failure a handler may recover from, or
/// what must propagate past the handler.
fn recover<E, E2>(cause: Cause<E>) -> Result<E, Cause<E2>>
where
    E: fmt::Debug + Any + Send + Sync,
{
    if !cause.is_recoverable() {
        return Err(unhandled(cause));
    }
    cause.failure_or_cause().map_err(unhandled)
}

/// Builds the next effect with `f` and runs it on the same fiber.
async fn continue_with<B, E2, F>(ctx: FiberContext, f: F) -> Exit<B, E2>
where
    B: Send + 'static,
    E2: Send + 'static,
    F: FnOnce() -> Effect<B, E2>,
{
    match guarded(f) {
        Ok(next) => next.run_in(ctx).await,
        Err(defect) => Exit::die(defect),
    }
}

impl<A, E> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    /// Transforms the success value.
    #[must_use]
    pub fn map<B, F>(self, f: F) -> Effect<B, E>
    where
        B: Send + 'static,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        Effect::from_node(Node::bind(self.into_node(), move |value| match downcast::<A>(value) {
            Ok(a) => Next::succeed(f(a)),
            Err(defect) => Next::die(defect),
        }))
    }

    /// Transforms every typed failure in the cause.
    #[must_use]
    pub fn map_error<E2, F>(self, f: F) -> Effect<A, E2>
    where
        E2: Send + 'static,
        F: Fn(E) -> E2 + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Effect::from_fn(move |ctx| {
            let body = self.run_in(ctx);
            let f = Arc::clone(&f);
            async move {
                match body.await {
                    Exit::Success(a) => Exit::Success(a),
                    Exit::Failure(cause) => apply(|| cause.map(|e| f(e)), Exit::Failure),
                }
            }
        })
    }

    /// Feeds the success value to `f` and runs the effect it returns.
    ///
    /// The continuation runs from the fiber's run loop, so effects that
    /// recurse through `flat_map` do not grow the native stack.
    #[must_use]
    pub fn flat_map<B, F>(self, f: F) -> Effect<B, E>
    where
        B: Send + 'static,
        F: Fn(A) -> Effect<B, E> + Send + Sync + 'static,
    {
        Effect::from_node(Node::bind(self.into_node(), move |value| match downcast::<A>(value) {
            Ok(a) => Next::Run(f(a).into_node()),
            Err(defect) => Next::die(defect),
        }))
    }

    /// Runs `self` then `that`, combining both values with `f`.
    #[must_use]
    pub fn zip_with<B, C, F>(self, that: Effect<B, E>, f: F) -> Effect<C, E>
    where
        B: Send + 'static,
        C: Send + 'static,
        F: Fn(A, B) -> C + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let that = that.into_node();
        Effect::from_node(Node::bind(self.into_node(), move |left| {
            let f = Arc::clone(&f);
            Next::Then(
                that.clone(),
                Box::new(move |right: Value| match (downcast::<A>(left), downcast::<B>(right)) {
                    (Ok(a), Ok(b)) => Next::succeed(f(a, b)),
                    (Err(defect), _) | (_, Err(defect)) => Next::die(defect),
                }),
            )
        }))
    }

    /// Runs `self` then `that` and pairs the values.
    #[must_use]
    pub fn zip<B: Send + 'static>(self, that: Effect<B, E>) -> Effect<(A, B), E> {
        self.zip_with(that, |a, b| (a, b))
    }

    /// Runs `self` then `that`, keeping the value of `self`.
    #[must_use]
    pub fn zip_left<B: Send + 'static>(self, that: Effect<B, E>) -> Self {
        self.zip_with(that, |a, _| a)
    }

    /// Runs `self` then `that`, keeping the value of `that`.
    #[must_use]
    pub fn zip_right<B: Send + 'static>(self, that: Effect<B, E>) -> Effect<B, E> {
        self.zip_with(that, |_, b| b)
    }

    /// Runs `f` on the success value for its effects, keeping the value.
    #[must_use]
    pub fn tap<F>(self, f: F) -> Self
    where
        F: Fn(&A) -> Effect<(), E> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Effect::from_fn(move |ctx: FiberContext| {
            let body = self.run_in(ctx.clone());
            let f = Arc::clone(&f);
            async move {
                let a = match body.await {
                    Exit::Success(a) => a,
                    Exit::Failure(cause) => return Exit::Failure(cause),
                };
                let next = guarded(|| f(&a));
                let tapped = match next {
                    Ok(effect) => effect.run_in(ctx).await,
                    Err(defect) => Exit::die(defect),
                };
                tapped.map(|()| a)
            }
        })
    }

    /// Runs `f` on the first typed failure for its effects, keeping the
    /// failure. A failing tap is recorded after the original cause.
    #[must_use]
    pub fn tap_error<F>(self, f: F) -> Self
    where
        F: Fn(&E) -> Effect<(), E> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Effect::from_fn(move |ctx: FiberContext| {
            let body = self.run_in(ctx.clone());
            let f = Arc::clone(&f);
            async move {
                let cause = match body.await {
                    Exit::Success(a) => return Exit::Success(a),
                    Exit::Failure(cause) => cause,
                };
                let next = match cause.first_failure() {
                    Some(error) => guarded(|| f(error)),
                    None => return Exit::Failure(cause),
                };
                let tapped = match next {
                    Ok(effect) => effect.run_in(ctx).await,
                    Err(defect) => Exit::die(defect),
                };
                match tapped {
                    Exit::Success(()) => Exit::Failure(cause),
                    Exit::Failure(tap) => Exit::Failure(Cause::sequential(cause, tap)),
                }
            }
        })
    }

    /// Recovers from typed failures.
    ///
    /// `f` receives the first typed failure. Causes that also contain a
    /// defect or an interruption are not recoverable and propagate, with
    /// their typed failures carried as defect payloads.
    #[must_use]
    pub fn catch_all<E2, F>(self, f: F) -> Effect<A, E2>
    where
        E: fmt::Debug + Sync,
        E2: Send + 'static,
        F: Fn(E) -> Effect<A, E2> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Effect::from_fn(move |ctx: FiberContext| {
            let body = self.run_in(ctx.clone());
            let f = Arc::clone(&f);
            async move {
                match body.await {
                    Exit::Success(a) => Exit::Success(a),
                    Exit::Failure(cause) => match recover(cause) {
                        Ok(error) => continue_with(ctx, || f(error)).await,
                        Err(cause) => Exit::Failure(cause),
                    },
                }
            }
        })
    }

    /// Recovers from any failure, including defects and interruptions.
    #[must_use]
    pub fn catch_all_cause<E2, F>(self, f: F) -> Effect<A, E2>
    where
        E2: Send + 'static,
        F: Fn(Cause<E>) -> Effect<A, E2> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Effect::from_fn(move |ctx: FiberContext| {
            let body = self.run_in(ctx.clone());
            let f = Arc::clone(&f);
            async move {
                match body.await {
                    Exit::Success(a) => Exit::Success(a),
                    Exit::Failure(cause) => continue_with(ctx, || f(cause)).await,
                }
            }
        })
    }

    /// Runs `that` if `self` fails with a recoverable cause.
    #[must_use]
    pub fn or_else<E2: Send + 'static>(self, that: Effect<A, E2>) -> Effect<A, E2>
    where
        E: fmt::Debug + Sync,
    {
        self.catch_all(move |_| that.clone())
    }

    /// Continues with `on_success` or, for recoverable failures, with
    /// `on_failure`.
    #[must_use]
    pub fn match_effect<B, E2, F, S>(self, on_failure: F, on_success: S) -> Effect<B, E2>
    where
        E: fmt::Debug + Sync,
        B: Send + 'static,
        E2: Send + 'static,
        F: Fn(E) -> Effect<B, E2> + Send + Sync + 'static,
        S: Fn(A) -> Effect<B, E2> + Send + Sync + 'static,
    {
        let on_failure = Arc::new(on_failure);
        let on_success = Arc::new(on_success);
        Effect::from_fn(move |ctx: FiberContext| {
            let body = self.run_in(ctx.clone());
            let on_failure = Arc::clone(&on_failure);
            let on_success = Arc::clone(&on_success);
            async move {
                match body.await {
                    Exit::Success(a) => continue_with(ctx, || on_success(a)).await,
                    Exit::Failure(cause) => match recover(cause) {
                        Ok(error) => continue_with(ctx, || on_failure(error)).await,
                        Err(cause) => Exit::Failure(cause),
                    },
                }
            }
        })
    }

    /// Continues with `on_success` or `on_failure`, which sees the full
    /// cause.
    #[must_use]
    pub fn match_cause_effect<B, E2, F, S>(self, on_failure: F, on_success: S) -> Effect<B, E2>
    where
        B: Send + 'static,
        E2: Send + 'static,
        F: Fn(Cause<E>) -> Effect<B, E2> + Send + Sync + 'static,
        S: Fn(A) -> Effect<B, E2> + Send + Sync + 'static,
    {
        let on_failure = Arc::new(on_failure);
        let on_success = Arc::new(on_success);
        Effect::from_fn(move |ctx: FiberContext| {
            let body = self.run_in(ctx.clone());
            let on_failure = Arc::clone(&on_failure);
            let on_success = Arc::clone(&on_success);
            async move {
                match body.await {
                    Exit::Success(a) => continue_with(ctx, || on_success(a)).await,
                    Exit::Failure(cause) => continue_with(ctx, || on_failure(cause)).await,
                }
            }
        })
    }

    /// Surfaces a recoverable failure as `Err` in the success channel.
    #[must_use]
    pub fn either<E2: Send + 'static>(self) -> Effect<Result<A, E>, E2>
    where
        E: fmt::Debug + Sync,
    {
        Effect::from_fn(move |ctx| {
            let body = self.run_in(ctx);
            async move {
                match body.await {
                    Exit::Success(a) => Exit::Success(Ok(a)),
                    Exit::Failure(cause) => match recover(cause) {
                        Ok(error) => Exit::Success(Err(error)),
                        Err(cause) => Exit::Failure(cause),
                    },
                }
            }
        })
    }

    /// Succeeds with the exit of `self`, whatever it is.
    #[must_use]
    pub fn exit<E2: Send + 'static>(self) -> Effect<Exit<A, E>, E2> {
        Effect::from_fn(move |ctx| {
            let body = self.run_in(ctx);
            async move { Exit::Success(body.await) }
        })
    }

    /// Exposes the full cause as the typed failure.
    #[must_use]
    pub fn sandbox(self) -> Effect<A, Cause<E>> {
        Effect::from_fn(move |ctx| {
            let body = self.run_in(ctx);
            async move {
                match body.await {
                    Exit::Success(a) => Exit::Success(a),
                    Exit::Failure(cause) => Exit::fail(cause),
                }
            }
        })
    }

    /// Turns typed failures into defects.
    #[must_use]
    pub fn or_die<E2: Send + 'static>(self) -> Effect<A, E2>
    where
        E: fmt::Debug + Sync,
    {
        Effect::from_fn(move |ctx| {
            let body = self.run_in(ctx);
            async move {
                match body.await {
                    Exit::Success(a) => Exit::Success(a),
                    Exit::Failure(cause) => Exit::Failure(unhandled(cause)),
                }
            }
        })
    }

    /// Runs `finalizer` after `self` however it ends, uninterruptibly.
    ///
    /// A failing finalizer replaces a success and is recorded after an
    /// existing cause.
    #[must_use]
    pub fn ensuring(self, finalizer: Effect<(), Infallible>) -> Self {
        self.on_exit(move |_| finalizer.clone())
    }

    /// Like [`ensuring`](Self::ensuring), with the finalizer chosen from the
    /// exit.
    #[must_use]
    pub fn on_exit<F>(self, finalizer: F) -> Self
    where
        F: Fn(&Exit<A, E>) -> Effect<(), Infallible> + Send + Sync + 'static,
    {
        let finalizer = Arc::new(finalizer);
        Effect::from_fn(move |ctx: FiberContext| {
            let body = self.run_in(ctx.clone());
            let finalizer = Arc::clone(&finalizer);
            async move {
                let exit = body.await;
                let fin = {
                    let _mask = ctx.core().mask();
                    let next = guarded(|| finalizer(&exit));
                    match next {
                        Ok(effect) => effect.run_in(ctx.clone()).await,
                        Err(defect) => Exit::die(defect),
                    }
                };
                ctx.leave_mask(merge_finalizer(exit, fin))
            }
        })
    }

    /// Runs `self` with interruption deferred until it completes.
    #[must_use]
    pub fn uninterruptible(self) -> Self {
        Effect::from_fn(move |ctx: FiberContext| {
            let this = self.clone();
            async move {
                let exit = {
                    let _mask = ctx.core().mask();
                    this.run_in(ctx.clone()).await
                };
                ctx.leave_mask(exit)
            }
        })
    }

    /// Sleeps for `duration`, then runs `self`.
    #[must_use]
    pub fn delay(self, duration: Duration) -> Self {
        Effect::<(), E>::sleep(duration).zip_right(self)
    }
}

impl<A, E> Effect<A, Cause<E>>
where
    A: Send + 'static,
    E: Send + 'static,
{
    /// Inverse of [`sandbox`](Effect::sandbox).
    #[must_use]
    pub fn unsandbox(self) -> Effect<A, E> {
        Effect::from_fn(move |ctx| {
            let body = self.run_in(ctx);
            async move {
                match body.await {
                    Exit::Success(a) => Exit::Success(a),
                    Exit::Failure(cause) => Exit::Failure(cause.flatten()),
                }
            }
        })
    }
}
