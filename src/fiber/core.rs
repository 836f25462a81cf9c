//! Per-fiber identity, lifecycle status and interruption state.

use crate::types::FiberId;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::task::Waker;

/// Why a fiber is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    /// Voluntarily yielded to let other fibers run.
    Yield,
    /// Waiting for a sleep or schedule delay.
    Sleep,
    /// Waiting for another fiber to finish.
    AwaitFiber(FiberId),
    /// Waiting on a latch.
    Latch,
    /// Waiting on an injected asynchronous capability.
    External,
}

/// Lifecycle state of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    /// Scheduled or currently being polled.
    Running,
    /// Parked at a suspension point.
    Suspended(SuspendReason),
    /// Observed an interruption and is unwinding.
    Interrupting,
    /// Published its exit.
    Done,
}

impl FiberStatus {
    /// Returns true once the fiber has published its exit.
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Done)
    }
}

struct CoreState {
    status: FiberStatus,
    interruptor: Option<FiberId>,
    mask_depth: u32,
    waker: Option<Waker>,
}

/// State shared between a running fiber, its handles and its interrupters.
pub(crate) struct FiberCore {
    id: FiberId,
    parent: Option<FiberId>,
    state: Mutex<CoreState>,
}

impl fmt::Debug for FiberCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FiberCore")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("status", &state.status)
            .field("interruptor", &state.interruptor)
            .field("mask_depth", &state.mask_depth)
            .finish()
    }
}

impl FiberCore {
    pub(crate) fn new(id: FiberId, parent: Option<FiberId>) -> Self {
        Self {
            id,
            parent,
            state: Mutex::new(CoreState {
                status: FiberStatus::Running,
                interruptor: None,
                mask_depth: 0,
                waker: None,
            }),
        }
    }

    pub(crate) const fn id(&self) -> FiberId {
        self.id
    }

    pub(crate) const fn parent(&self) -> Option<FiberId> {
        self.parent
    }

    pub(crate) fn status(&self) -> FiberStatus {
        self.state.lock().status
    }

    /// The first fiber that requested interruption, if any.
    pub(crate) fn interruptor(&self) -> Option<FiberId> {
        self.state.lock().interruptor
    }

    /// Records an interruption request and wakes the fiber so its next
    /// suspension point can observe it.
    ///
    /// The first request wins; later ones only re-wake. Returns false when
    /// the fiber is already done.
    pub(crate) fn request_interrupt(&self, by: FiberId) -> bool {
        let waker = {
            let mut state = self.state.lock();
            if state.status.is_done() {
                return false;
            }
            if state.interruptor.is_none() {
                state.interruptor = Some(by);
            }
            state.waker.clone()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Returns the interruptor if interruption is pending and unmasked, and
    /// moves the fiber to `Interrupting`.
    pub(crate) fn observe_interrupt(&self) -> Option<FiberId> {
        let mut state = self.state.lock();
        Self::observe_locked(&mut state)
    }

    fn observe_locked(state: &mut CoreState) -> Option<FiberId> {
        if state.mask_depth > 0 {
            return None;
        }
        let by = state.interruptor?;
        state.status = FiberStatus::Interrupting;
        Some(by)
    }

    /// Parks the fiber at a suspension point.
    ///
    /// The waker is stored before the interruption flag is read, under the
    /// same lock `request_interrupt` takes, so a request can never slip
    /// between the check and the park.
    pub(crate) fn suspend(&self, reason: SuspendReason, waker: &Waker) -> Option<FiberId> {
        let mut state = self.state.lock();
        match &mut state.waker {
            Some(current) if current.will_wake(waker) => {}
            slot => *slot = Some(waker.clone()),
        }
        if let Some(by) = Self::observe_locked(&mut state) {
            return Some(by);
        }
        if state.status != FiberStatus::Interrupting {
            state.status = FiberStatus::Suspended(reason);
        }
        None
    }

    /// Marks the fiber as running again after a suspension point completed.
    pub(crate) fn resume(&self) {
        let mut state = self.state.lock();
        if matches!(state.status, FiberStatus::Suspended(_)) {
            state.status = FiberStatus::Running;
        }
    }

    /// Enters an uninterruptible region until the guard is dropped.
    pub(crate) fn mask(self: &Arc<Self>) -> MaskGuard {
        self.state.lock().mask_depth += 1;
        MaskGuard {
            core: Arc::clone(self),
        }
    }

    pub(crate) fn is_masked(&self) -> bool {
        self.state.lock().mask_depth > 0
    }

    /// Publishes completion. Drops the stored waker so the task is not kept
    /// alive by its own core.
    pub(crate) fn finish(&self) {
        let mut state = self.state.lock();
        state.status = FiberStatus::Done;
        state.waker = None;
    }
}

/// Restores interruptibility when dropped.
#[must_use = "the region is uninterruptible only while the guard is alive"]
pub(crate) struct MaskGuard {
    core: Arc<FiberCore>,
}

impl Drop for MaskGuard {
    fn drop(&mut self) {
        let mut state = self.core.state.lock();
        state.mask_depth = state.mask_depth.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;

    #[derive(Default)]
    struct WakeCounter(AtomicUsize);

    impl Wake for WakeCounter {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn core() -> Arc<FiberCore> {
        Arc::new(FiberCore::new(FiberId::next(), None))
    }

    #[test]
    fn first_interruptor_wins() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("first_interruptor_wins");

        let core = core();
        let a = FiberId::from_raw(100);
        let b = FiberId::from_raw(200);
        assert!(core.request_interrupt(a));
        assert!(core.request_interrupt(b));
        crate::assert_with_log!(
            core.interruptor() == Some(a),
            "interruptor is monotonic",
            Some(a),
            core.interruptor()
        );
        crate::test_complete!("first_interruptor_wins");
    }

    #[test]
    fn suspend_observes_pending_interrupt() {
        let core = core();
        let waker = Waker::noop();
        assert_eq!(core.suspend(SuspendReason::Yield, waker), None);
        assert_eq!(core.status(), FiberStatus::Suspended(SuspendReason::Yield));
        core.resume();
        assert_eq!(core.status(), FiberStatus::Running);

        let by = FiberId::from_raw(9);
        core.request_interrupt(by);
        assert_eq!(core.suspend(SuspendReason::Sleep, waker), Some(by));
        assert_eq!(core.status(), FiberStatus::Interrupting);
    }

    #[test]
    fn request_wakes_suspended_fiber() {
        let core = core();
        let counter = Arc::new(WakeCounter::default());
        let waker = Waker::from(Arc::clone(&counter));
        assert_eq!(core.suspend(SuspendReason::Latch, &waker), None);
        core.request_interrupt(FiberId::from_raw(1));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mask_defers_observation() {
        let core = core();
        let by = FiberId::from_raw(3);
        core.request_interrupt(by);
        {
            let _outer = core.mask();
            let _inner = core.mask();
            assert!(core.is_masked());
            assert_eq!(core.observe_interrupt(), None);
        }
        assert!(!core.is_masked());
        assert_eq!(core.observe_interrupt(), Some(by));
    }

    #[test]
    fn done_fiber_ignores_requests() {
        let core = core();
        core.finish();
        assert!(!core.request_interrupt(FiberId::from_raw(1)));
        assert_eq!(core.interruptor(), None);
        assert!(core.status().is_done());
    }
}
