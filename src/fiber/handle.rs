//! Handles to forked fibers.

use super::core::{FiberStatus, SuspendReason};
use super::shared::{ErasedFiber, FiberShared, WaitDone};
use super::FiberContext;
use crate::effect::Effect;
use crate::types::{Exit, FiberId};
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

/// A handle to a forked fiber.
///
/// Handles are cheap to clone. Dropping every handle does not stop the
/// fiber; it keeps running until it completes or is interrupted.
pub struct FiberHandle<A, E> {
    shared: Arc<FiberShared<A, E>>,
}

impl<A, E> Clone for FiberHandle<A, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A, E> fmt::Debug for FiberHandle<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberHandle")
            .field("id", &self.id())
            .field("status", &self.status())
            .finish()
    }
}

impl<A, E> FiberHandle<A, E> {
    pub(crate) const fn new(shared: Arc<FiberShared<A, E>>) -> Self {
        Self { shared }
    }

    /// The fiber's identity.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.shared.core().id()
    }

    /// The fiber that forked this one, if any.
    #[must_use]
    pub fn parent(&self) -> Option<FiberId> {
        self.shared.core().parent()
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> FiberStatus {
        self.shared.core().status()
    }

    /// Returns true once the fiber has published its exit.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.shared.is_done()
    }

    /// The first fiber that requested interruption of this one.
    #[must_use]
    pub fn interruptor(&self) -> Option<FiberId> {
        self.shared.core().interruptor()
    }

    /// Fibers currently suspended waiting for this one.
    #[must_use]
    pub fn awaiters(&self) -> Vec<FiberId> {
        self.shared.awaiters()
    }

    /// Requests interruption without waiting for it to take effect.
    ///
    /// Returns false if the fiber had already completed.
    pub fn request_interrupt(&self, by: FiberId) -> bool {
        self.shared.core().request_interrupt(by)
    }

    /// Moves the exit out. Only for callers that are the sole observer.
    pub(crate) fn take_exit(&self) -> Exit<A, E> {
        self.shared.take_exit().unwrap_or_else(missing_exit)
    }
}

impl<A, E> FiberHandle<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn erased(&self) -> Arc<dyn ErasedFiber> {
        let erased: Arc<dyn ErasedFiber> = self.shared.clone();
        erased
    }

    pub(crate) fn wait_done(&self, awaiter: FiberId) -> WaitDone {
        WaitDone::new(self.erased(), awaiter)
    }

    /// Interrupts the fiber and waits, uninterruptibly, until it is done.
    /// The fiber's exit is left in place for other observers.
    pub(crate) fn interrupt_and_wait(&self) -> Effect<(), Infallible> {
        let fiber = self.erased();
        Effect::from_fn(move |ctx: FiberContext| {
            let fiber = Arc::clone(&fiber);
            async move {
                fiber.core().request_interrupt(ctx.id());
                let _mask = ctx.core().mask();
                let id = fiber.core().id();
                let wait = WaitDone::new(fiber, ctx.id());
                // Masked, so the suspension cannot be cut short.
                let _ = ctx.suspend(SuspendReason::AwaitFiber(id), wait).await;
                Exit::Success(())
            }
        })
    }
}

impl<A, E> FiberHandle<A, E>
where
    A: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Returns the exit if the fiber has completed.
    #[must_use]
    pub fn poll_exit(&self) -> Option<Exit<A, E>> {
        self.shared.exit_cloned()
    }

    /// Suspends the calling fiber until this one completes and yields its
    /// exit as a value.
    ///
    /// Interrupting the caller while it waits fails the caller; the awaited
    /// fiber keeps running.
    #[must_use]
    pub fn await_exit<E2: Send + 'static>(&self) -> Effect<Exit<A, E>, E2> {
        let handle = self.clone();
        Effect::from_fn(move |ctx| {
            let handle = handle.clone();
            async move {
                match handle.wait_exit(&ctx).await {
                    Ok(exit) => Exit::succeed(exit),
                    Err(by) => Exit::interrupt(by),
                }
            }
        })
    }

    /// Suspends until this fiber completes and adopts its outcome.
    #[must_use]
    pub fn join(&self) -> Effect<A, E> {
        let handle = self.clone();
        Effect::from_fn(move |ctx| {
            let handle = handle.clone();
            async move {
                match handle.wait_exit(&ctx).await {
                    Ok(exit) => exit,
                    Err(by) => Exit::interrupt(by),
                }
            }
        })
    }

    /// Requests interruption and suspends until the fiber has finished
    /// unwinding. Returns the fiber's exit, which is the already computed one
    /// if it completed before the request.
    ///
    /// The wait itself cannot be cut short. An interruption of the caller
    /// that arrives meanwhile takes effect as soon as the wait is over.
    #[must_use]
    pub fn interrupt<E2: Send + 'static>(&self) -> Effect<Exit<A, E>, E2> {
        let handle = self.clone();
        Effect::from_fn(move |ctx: FiberContext| {
            let handle = handle.clone();
            async move {
                handle.request_interrupt(ctx.id());
                let exit = {
                    let _mask = ctx.core().mask();
                    match handle.wait_exit(&ctx).await {
                        Ok(exit) => Exit::succeed(exit),
                        Err(by) => Exit::interrupt(by),
                    }
                };
                ctx.leave_mask(exit)
            }
        })
    }

    async fn wait_exit(&self, ctx: &FiberContext) -> Result<Exit<A, E>, FiberId> {
        ctx.suspend(
            SuspendReason::AwaitFiber(self.id()),
            self.wait_done(ctx.id()),
        )
        .await?;
        Ok(self.shared.exit_cloned().unwrap_or_else(missing_exit))
    }
}

fn missing_exit<A, E>() -> Exit<A, E> {
    Exit::die("fiber completed without publishing an exit")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_runtime;

    fn render<A, E>(handle: &FiberHandle<A, E>) -> String {
        format!("{handle:?}")
    }

    #[test]
    fn debug_shows_identity_and_status() {
        crate::test_utils::init_test_logging();
        let rt = test_runtime();
        let fiber = rt.fork(Effect::<u8, ()>::succeed(1));
        assert_eq!(rt.await_fiber(&fiber), Exit::succeed(1));

        let rendered = render(&fiber);
        assert_eq!(
            rendered,
            format!("FiberHandle {{ id: {:?}, status: Done }}", fiber.id())
        );
    }
}
