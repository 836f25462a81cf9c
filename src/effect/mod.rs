//! Effects: lazy, re-runnable descriptions of fiber work.
//!
//! An [`Effect<A, E>`] succeeds with an `A`, fails with a typed `E`, dies
//! with a [`Defect`], or is interrupted. Building an effect runs nothing;
//! a [`Runtime`](crate::Runtime) runs it inside a fiber. The same value can
//! be run any number of times, which is what [`Effect::retry`] and
//! [`Effect::repeat`] rely on.
//!
//! User closures passed to constructors and combinators are run under
//! `catch_unwind`: a panic becomes a `Die` cause at that point instead of
//! tearing down the fiber.
//!
//! ```
//! use effectus::{Effect, Exit, RuntimeBuilder};
//!
//! let rt = RuntimeBuilder::current_thread().build().unwrap();
//! let program = Effect::<i32, String>::fail("cold start".to_string())
//!     .catch_all(|_| Effect::<i32, String>::succeed(1))
//!     .zip(Effect::succeed(2))
//!     .map(|(a, b)| a + b);
//! assert_eq!(rt.run(program), Exit::succeed(3));
//! ```

mod combinators;
mod concurrent;
pub mod context;
mod retry;
mod run_loop;
pub mod scope;

pub use context::Context;
pub use scope::Scope;

use crate::fiber::{FiberContext, SuspendReason};
use crate::types::{Cause, Defect, Exit, FiberId, Time};
use run_loop::{Node, Value};
use futures_lite::FutureExt;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// A boxed, sendable future.
pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A description of work that succeeds with `A` or fails with `Cause<E>`.
pub struct Effect<A, E> {
    node: Node<E>,
    _marker: PhantomData<fn() -> A>,
}

impl<A, E> Clone for Effect<A, E> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Effect<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Effect<{}, {}>",
            std::any::type_name::<A>(),
            std::any::type_name::<E>()
        )
    }
}

/// Runs a user closure, turning a panic into a defect.
pub(crate) fn guarded<T>(f: impl FnOnce() -> T) -> Result<T, Defect> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|panic| Defect::from_panic(&*panic))
}

/// Composes a finalizer's outcome with the exit it ran after.
///
/// A clean finalizer leaves the exit untouched. A failing one replaces a
/// success and is appended sequentially to an existing cause.
pub(crate) fn merge_finalizer<A, E>(exit: Exit<A, E>, finalizer: Exit<(), Infallible>) -> Exit<A, E> {
    let cause = match finalizer {
        Exit::Success(()) => return exit,
        Exit::Failure(cause) if cause.is_empty() => return exit,
        Exit::Failure(cause) => cause.widen::<E>(),
    };
    match exit {
        Exit::Success(_) => Exit::Failure(cause),
        Exit::Failure(body) => Exit::Failure(Cause::sequential(body, cause)),
    }
}

impl<A, E> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    /// Builds an effect from its run function. The function must not run
    /// user code itself; everything observable happens in the future.
    pub(crate) fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(FiberContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Exit<A, E>> + Send + 'static,
    {
        Self::from_node(Node::leaf(move |ctx| {
            let body = f(ctx);
            Box::pin(async move { body.await.map(|a| Box::new(a) as Value) })
        }))
    }

    pub(crate) const fn from_node(node: Node<E>) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_node(self) -> Node<E> {
        self.node
    }

    /// Runs the effect on the fiber described by `ctx`.
    pub(crate) fn run_in(&self, ctx: FiberContext) -> BoxFuture<Exit<A, E>> {
        let node = self.node.clone();
        Box::pin(async move {
            match run_loop::run(node, ctx).await {
                Exit::Success(value) => run_loop::downcast(value).map_or_else(Exit::die, Exit::Success),
                Exit::Failure(cause) => Exit::Failure(cause),
            }
        })
    }

    /// Runs the effect and turns an escaped panic into a defect.
    pub(crate) async fn run_protected(self, ctx: FiberContext) -> Exit<A, E> {
        let fut = match guarded(|| self.run_in(ctx)) {
            Ok(fut) => fut,
            Err(defect) => return Exit::die(defect),
        };
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(exit) => exit,
            Err(panic) => Exit::die(Defect::from_panic(&*panic)),
        }
    }

    /// An effect that completes with `exit`.
    #[must_use]
    pub fn done(exit: Exit<A, E>) -> Self
    where
        A: Clone + Sync,
        E: Clone + Sync,
    {
        Self::from_fn(move |_| std::future::ready(exit.clone()))
    }

    /// An effect that succeeds with `value`.
    #[must_use]
    pub fn succeed(value: A) -> Self
    where
        A: Clone + Sync,
    {
        Self::from_fn(move |_| std::future::ready(Exit::Success(value.clone())))
    }

    /// An effect that fails with the typed error `error`.
    #[must_use]
    pub fn fail(error: E) -> Self
    where
        E: Clone + Sync,
    {
        Self::from_fn(move |_| std::future::ready(Exit::fail(error.clone())))
    }

    /// An effect that fails with `cause`.
    #[must_use]
    pub fn fail_cause(cause: Cause<E>) -> Self
    where
        E: Clone + Sync,
    {
        Self::from_fn(move |_| std::future::ready(Exit::Failure(cause.clone())))
    }

    /// An effect that dies with `defect`.
    #[must_use]
    pub fn die(defect: impl Into<Defect>) -> Self {
        let defect = defect.into();
        Self::from_fn(move |_| std::future::ready(Exit::die(defect.clone())))
    }

    /// An effect that dies with a defect carrying `message`.
    #[must_use]
    pub fn die_message(message: impl Into<String>) -> Self {
        Self::die(Defect::new(message))
    }

    /// Interrupts the running fiber itself.
    ///
    /// The fiber's interruption flag is set, so catching the resulting cause
    /// does not make the fiber interruptible-free: its next suspension point
    /// observes the interruption again.
    #[must_use]
    pub fn interrupt() -> Self {
        Self::from_fn(|ctx: FiberContext| async move {
            ctx.core().request_interrupt(ctx.id());
            Exit::interrupt(ctx.id())
        })
    }

    /// Runs a side-effecting closure. A panic becomes a defect.
    #[must_use]
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::from_fn(move |_| {
            let f = Arc::clone(&f);
            async move {
                match guarded(|| f()) {
                    Ok(value) => Exit::Success(value),
                    Err(defect) => Exit::die(defect),
                }
            }
        })
    }

    /// Runs a fallible closure; `Err` becomes a typed failure.
    #[must_use]
    pub fn try_sync<F>(f: F) -> Self
    where
        F: Fn() -> Result<A, E> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::from_fn(move |_| {
            let f = Arc::clone(&f);
            async move {
                match guarded(|| f()) {
                    Ok(result) => Exit::from(result),
                    Err(defect) => Exit::die(defect),
                }
            }
        })
    }

    /// Builds the effect to run lazily, each time it is run.
    #[must_use]
    pub fn suspend<F>(f: F) -> Self
    where
        F: Fn() -> Self + Send + Sync + 'static,
    {
        Self::from_node(Node::suspend(move || f().into_node()))
    }

    /// Wraps an injected asynchronous capability.
    ///
    /// `f` produces a fresh future per run. Waiting on it is a suspension
    /// point: if the fiber is interrupted meanwhile, the future is dropped
    /// and the effect ends with the interruption.
    #[must_use]
    pub fn from_future<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<A, E>> + Send + 'static,
    {
        let f = Arc::new(f);
        Self::from_fn(move |ctx: FiberContext| {
            let f = Arc::clone(&f);
            async move {
                let fut = match guarded(|| f()) {
                    Ok(fut) => fut,
                    Err(defect) => return Exit::die(defect),
                };
                let fut = AssertUnwindSafe(fut).catch_unwind();
                match ctx.suspend(SuspendReason::External, fut).await {
                    Ok(Ok(result)) => Exit::from(result),
                    Ok(Err(panic)) => Exit::die(Defect::from_panic(&*panic)),
                    Err(by) => Exit::interrupt(by),
                }
            }
        })
    }

    /// Never completes. Only interruption ends it.
    #[must_use]
    pub fn never() -> Self {
        Self::from_fn(|ctx: FiberContext| async move {
            match ctx
                .suspend(SuspendReason::External, std::future::pending::<()>())
                .await
            {
                Ok(()) => unreachable!("a pending future never resolves"),
                Err(by) => Exit::interrupt(by),
            }
        })
    }

    /// Runs `effects` one after another and collects their values.
    ///
    /// Stops at the first failure.
    #[must_use]
    pub fn all<I>(effects: I) -> Effect<Vec<A>, E>
    where
        I: IntoIterator<Item = Self>,
    {
        let effects: Arc<[Self]> = effects.into_iter().collect();
        Effect::from_fn(move |ctx: FiberContext| {
            let effects = Arc::clone(&effects);
            async move {
                let mut values = Vec::with_capacity(effects.len());
                for effect in effects.iter() {
                    match effect.run_in(ctx.clone()).await {
                        Exit::Success(value) => values.push(value),
                        Exit::Failure(cause) => return Exit::Failure(cause),
                    }
                }
                Exit::Success(values)
            }
        })
    }
}

impl<E: Send + 'static> Effect<(), E> {
    /// Succeeds with `()`.
    #[must_use]
    pub fn unit() -> Self {
        Self::from_fn(|_| std::future::ready(Exit::Success(())))
    }

    /// Suspends the fiber for `duration` on the runtime's clock.
    #[must_use]
    pub fn sleep(duration: Duration) -> Self {
        Self::from_fn(move |ctx: FiberContext| async move {
            match ctx.sleep(duration).await {
                Ok(()) => Exit::Success(()),
                Err(by) => Exit::interrupt(by),
            }
        })
    }

    /// Lets every other runnable fiber take a turn.
    #[must_use]
    pub fn yield_now() -> Self {
        Self::from_fn(|ctx: FiberContext| async move {
            match ctx.yield_now().await {
                Ok(()) => Exit::Success(()),
                Err(by) => Exit::interrupt(by),
            }
        })
    }
}

impl<E: Send + 'static> Effect<FiberId, E> {
    /// The id of the fiber running the effect.
    #[must_use]
    pub fn fiber_id() -> Self {
        Self::from_fn(|ctx: FiberContext| std::future::ready(Exit::Success(ctx.id())))
    }
}

impl<E: Send + 'static> Effect<Time, E> {
    /// The current time of the runtime's clock.
    #[must_use]
    pub fn now() -> Self {
        Self::from_fn(|ctx: FiberContext| std::future::ready(Exit::Success(ctx.now())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::run_test;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn constructing_runs_nothing() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("constructing_runs_nothing");

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let effect = Effect::<_, ()>::sync(move || counter.fetch_add(1, Ordering::SeqCst));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        crate::assert_exit_success!(run_test(effect.clone()), 0);
        crate::assert_exit_success!(run_test(effect), 1);
        crate::test_complete!("constructing_runs_nothing");
    }

    #[test]
    fn basic_constructors() {
        crate::assert_exit_success!(run_test(Effect::<_, ()>::succeed("v")), "v");
        assert_eq!(run_test(Effect::<(), _>::fail(4)), Exit::fail(4));
        assert_eq!(
            run_test(Effect::<(), i32>::die_message("bad")),
            Exit::die("bad")
        );
        assert_eq!(run_test(Effect::<(), ()>::unit()), Exit::Success(()));
        assert_eq!(
            run_test(Effect::<i32, i32>::done(Exit::fail(9))),
            Exit::fail(9)
        );
        let cause = Cause::parallel(Cause::fail(1), Cause::fail(2));
        assert_eq!(
            run_test(Effect::<(), i32>::fail_cause(cause.clone())),
            Exit::Failure(cause)
        );
    }

    #[test]
    fn try_sync_maps_result() {
        let ok = Effect::<i32, String>::try_sync(|| Ok(3));
        let err = Effect::<i32, String>::try_sync(|| Err("nope".to_string()));
        crate::assert_exit_success!(run_test(ok), 3);
        assert_eq!(run_test(err), Exit::fail("nope".to_string()));
    }

    #[test]
    fn suspend_builds_fresh_effect_per_run() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let effect = Effect::<usize, ()>::suspend(move || {
            Effect::succeed(counter.fetch_add(1, Ordering::SeqCst))
        });
        crate::assert_exit_success!(run_test(effect.clone()), 0);
        crate::assert_exit_success!(run_test(effect), 1);
    }

    #[test]
    fn from_future_success_failure_and_panic() {
        crate::assert_exit_success!(
            run_test(Effect::<_, ()>::from_future(|| async { Ok(5) })),
            5
        );
        assert_eq!(
            run_test(Effect::<(), _>::from_future(|| async { Err("io") })),
            Exit::fail("io")
        );
        let exit = run_test(Effect::<(), ()>::from_future(|| async {
            panic!("inside future")
        }));
        assert_eq!(exit, Exit::die("inside future"));
    }

    #[test]
    fn self_interrupt_names_the_fiber() {
        let exit = run_test(
            Effect::<FiberId, ()>::fiber_id()
                .zip(Effect::<(), ()>::interrupt().exit())
                .map(|(id, exit)| (id, exit.cause().map(Cause::interruptors))),
        );
        match exit {
            Exit::Success((id, Some(ids))) => assert_eq!(ids, vec![id]),
            other => panic!("unexpected exit: {other:?}"),
        }
    }

    #[test]
    fn all_collects_in_order_and_stops_on_failure() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let effects = vec![
            Effect::<i32, &str>::succeed(1),
            Effect::fail("second"),
            Effect::sync(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                3
            }),
        ];
        assert_eq!(run_test(Effect::all(effects)), Exit::fail("second"));
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        let effects = (1..=3).map(Effect::<i32, ()>::succeed);
        crate::assert_exit_success!(run_test(Effect::all(effects)), vec![1, 2, 3]);
    }

    #[test]
    fn sleep_and_now_follow_the_virtual_clock() {
        let effect = Effect::<(), ()>::sleep(Duration::from_millis(250))
            .zip_right(Effect::now());
        crate::assert_exit_success!(run_test(effect), Time::from_millis(250));
    }

    #[test]
    fn merge_finalizer_rules() {
        let clean: Exit<(), Infallible> = Exit::Success(());
        let broken: Exit<(), Infallible> = Exit::die("fin");
        assert_eq!(merge_finalizer(Exit::<i32, &str>::succeed(1), clean.clone()), Exit::succeed(1));
        assert_eq!(merge_finalizer(Exit::<i32, &str>::succeed(1), broken.clone()), Exit::die("fin"));
        assert_eq!(
            merge_finalizer(Exit::<i32, &str>::fail("body"), broken),
            Exit::Failure(Cause::sequential(Cause::fail("body"), Cause::die("fin")))
        );
        assert_eq!(merge_finalizer(Exit::<i32, &str>::fail("body"), clean), Exit::fail("body"));
    }
}
