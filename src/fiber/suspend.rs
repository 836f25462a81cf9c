//! Suspension points.
//!
//! Every place a fiber can park goes through [`Suspend`]. The inner future is
//! polled first; only when it is not ready does the fiber record its waker
//! and check for a pending interruption. A wake-up from
//! [`FiberCore::request_interrupt`] therefore always lands on a poll that
//! observes the request.

use super::core::{FiberCore, SuspendReason};
use crate::types::FiberId;
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Wraps a future so that it can be abandoned on interruption.
///
/// Resolves to `Err(interruptor)` when the fiber is interrupted while parked.
/// The inner future is dropped together with this wrapper.
#[pin_project]
#[must_use = "futures do nothing unless polled"]
pub(crate) struct Suspend<F> {
    core: Arc<FiberCore>,
    reason: SuspendReason,
    #[pin]
    inner: F,
}

impl<F> Suspend<F> {
    pub(crate) const fn new(core: Arc<FiberCore>, reason: SuspendReason, inner: F) -> Self {
        Self {
            core,
            reason,
            inner,
        }
    }
}

impl<F: Future> Future for Suspend<F> {
    type Output = Result<F::Output, FiberId>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Poll::Ready(value) = this.inner.poll(cx) {
            this.core.resume();
            return Poll::Ready(Ok(value));
        }
        match this.core.suspend(*this.reason, cx.waker()) {
            Some(by) => Poll::Ready(Err(by)),
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::FiberStatus;
    use std::task::Waker;

    #[test]
    fn ready_inner_wins_over_pending_interrupt() {
        let core = Arc::new(FiberCore::new(FiberId::next(), None));
        core.request_interrupt(FiberId::from_raw(5));
        let mut cx = Context::from_waker(Waker::noop());
        let mut fut = Box::pin(Suspend::new(
            Arc::clone(&core),
            SuspendReason::External,
            std::future::ready(7),
        ));
        assert_eq!(fut.as_mut().poll(&mut cx), Poll::Ready(Ok(7)));
    }

    #[test]
    fn pending_inner_observes_interrupt() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("pending_inner_observes_interrupt");

        let core = Arc::new(FiberCore::new(FiberId::next(), None));
        let mut cx = Context::from_waker(Waker::noop());
        let mut fut = Box::pin(Suspend::new(
            Arc::clone(&core),
            SuspendReason::Sleep,
            std::future::pending::<()>(),
        ));
        assert_eq!(fut.as_mut().poll(&mut cx), Poll::Pending);
        assert_eq!(
            core.status(),
            FiberStatus::Suspended(SuspendReason::Sleep)
        );

        let by = FiberId::from_raw(11);
        core.request_interrupt(by);
        assert_eq!(fut.as_mut().poll(&mut cx), Poll::Ready(Err(by)));
        crate::test_complete!("pending_inner_observes_interrupt");
    }

    #[test]
    fn masked_suspension_keeps_waiting() {
        let core = Arc::new(FiberCore::new(FiberId::next(), None));
        let _mask = core.mask();
        core.request_interrupt(FiberId::from_raw(2));
        let mut cx = Context::from_waker(Waker::noop());
        let mut fut = Box::pin(Suspend::new(
            Arc::clone(&core),
            SuspendReason::Latch,
            std::future::pending::<()>(),
        ));
        assert_eq!(fut.as_mut().poll(&mut cx), Poll::Pending);
    }
}
