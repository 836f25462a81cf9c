//! The completion slot of a fiber.
//!
//! The slot holds the exit once it is published plus the table of fibers
//! waiting for it. The table maps an [`AwaiterKey`] to a waker and never
//! holds the awaiting fiber itself, so a fiber and its awaiters cannot keep
//! each other alive.

use super::core::FiberCore;
use crate::types::{Exit, FiberId};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Identifies one registered wait on a fiber's completion.
///
/// The sequence number tells apart several concurrent waits issued by the
/// same awaiting fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct AwaiterKey {
    fiber: FiberId,
    seq: u64,
}

struct Slot<A, E> {
    exit: Option<Exit<A, E>>,
    awaiters: HashMap<AwaiterKey, Waker>,
    next_seq: u64,
}

pub(crate) struct FiberShared<A, E> {
    core: Arc<FiberCore>,
    slot: Mutex<Slot<A, E>>,
}

impl<A, E> FiberShared<A, E> {
    pub(crate) fn new(core: Arc<FiberCore>) -> Self {
        Self {
            core,
            slot: Mutex::new(Slot {
                exit: None,
                awaiters: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    pub(crate) const fn core(&self) -> &Arc<FiberCore> {
        &self.core
    }

    /// Publishes the exit. Only the first call has an effect.
    ///
    /// Lock order is slot then core; nothing takes them the other way round.
    pub(crate) fn complete(&self, exit: Exit<A, E>) -> bool {
        let wakers: Vec<Waker> = {
            let mut slot = self.slot.lock();
            if slot.exit.is_some() {
                return false;
            }
            slot.exit = Some(exit);
            self.core.finish();
            slot.awaiters.drain().map(|(_, waker)| waker).collect()
        };
        for waker in wakers {
            waker.wake();
        }
        true
    }

    pub(crate) fn is_done(&self) -> bool {
        self.core.status().is_done()
    }

    /// Takes the exit out of the slot. Used when the caller is known to be
    /// the only observer.
    pub(crate) fn take_exit(&self) -> Option<Exit<A, E>> {
        self.slot.lock().exit.take()
    }

    pub(crate) fn awaiters(&self) -> Vec<FiberId> {
        let mut ids: Vec<FiberId> = self.slot.lock().awaiters.keys().map(|k| k.fiber).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn poll_done_inner(
        &self,
        key: &mut Option<AwaiterKey>,
        awaiter: FiberId,
        cx: &Context<'_>,
    ) -> Poll<()> {
        let mut slot = self.slot.lock();
        if slot.exit.is_some() || self.core.status().is_done() {
            if let Some(stale) = key.take() {
                slot.awaiters.remove(&stale);
            }
            return Poll::Ready(());
        }
        let registered = match *key {
            Some(existing) => existing,
            None => {
                let fresh = AwaiterKey {
                    fiber: awaiter,
                    seq: slot.next_seq,
                };
                slot.next_seq += 1;
                *key = Some(fresh);
                fresh
            }
        };
        match slot.awaiters.get_mut(&registered) {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            Some(waker) => waker.clone_from(cx.waker()),
            None => {
                slot.awaiters.insert(registered, cx.waker().clone());
            }
        }
        Poll::Pending
    }
}

impl<A: Clone, E: Clone> FiberShared<A, E> {
    pub(crate) fn exit_cloned(&self) -> Option<Exit<A, E>> {
        self.slot.lock().exit.clone()
    }
}

/// Type-erased view of a fiber used when waiting on children of different
/// result types.
pub(crate) trait ErasedFiber: Send + Sync {
    fn core(&self) -> &Arc<FiberCore>;

    fn poll_done(
        &self,
        key: &mut Option<AwaiterKey>,
        awaiter: FiberId,
        cx: &mut Context<'_>,
    ) -> Poll<()>;

    fn unregister(&self, key: AwaiterKey);

    /// `None` while running, otherwise whether the exit is a success.
    fn is_success(&self) -> Option<bool>;
}

impl<A: Send, E: Send> ErasedFiber for FiberShared<A, E> {
    fn core(&self) -> &Arc<FiberCore> {
        &self.core
    }

    fn poll_done(
        &self,
        key: &mut Option<AwaiterKey>,
        awaiter: FiberId,
        cx: &mut Context<'_>,
    ) -> Poll<()> {
        self.poll_done_inner(key, awaiter, cx)
    }

    fn unregister(&self, key: AwaiterKey) {
        self.slot.lock().awaiters.remove(&key);
    }

    fn is_success(&self) -> Option<bool> {
        self.slot.lock().exit.as_ref().map(Exit::is_success)
    }
}

/// Resolves once the fiber has published its exit.
///
/// Dropping the future before completion removes its entry from the
/// awaiter table.
#[must_use = "futures do nothing unless polled"]
pub(crate) struct WaitDone {
    fiber: Arc<dyn ErasedFiber>,
    awaiter: FiberId,
    key: Option<AwaiterKey>,
}

impl WaitDone {
    pub(crate) fn new(fiber: Arc<dyn ErasedFiber>, awaiter: FiberId) -> Self {
        Self {
            fiber,
            awaiter,
            key: None,
        }
    }

    pub(crate) fn fiber(&self) -> &Arc<dyn ErasedFiber> {
        &self.fiber
    }
}

impl Future for WaitDone {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        this.fiber.poll_done(&mut this.key, this.awaiter, cx)
    }
}

impl Drop for WaitDone {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.fiber.unregister(key);
        }
    }
}
