//! A gate that fibers wait on until it opens.
//!
//! A [`Latch`] is either open or closed. Waiting on an open latch completes
//! without suspending. Waiting on a closed latch parks the fiber in the
//! latch queue until [`Latch::open`] or [`Latch::release`] wakes it.
//!
//! Each queued waiter owns one entry in the queue. The entry is removed
//! either by a release, which wakes it, or by the waiter going away (for
//! example because its fiber was interrupted). Never both.

use crate::effect::Effect;
use crate::fiber::{FiberContext, SuspendReason};
use crate::tracing_compat::trace;
use crate::types::Exit;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

struct LatchState {
    open: bool,
    waiters: HashMap<u64, Waker>,
    next_key: u64,
}

impl LatchState {
    fn wake_all(&mut self) -> Vec<Waker> {
        self.waiters.drain().map(|(_, waker)| waker).collect()
    }
}

/// A shared open/closed gate. Cloning yields another handle to the same
/// latch.
#[derive(Clone)]
pub struct Latch {
    state: Arc<Mutex<LatchState>>,
}

impl fmt::Debug for Latch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Latch")
            .field("open", &state.open)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

impl Latch {
    /// Creates a latch in the given state.
    #[must_use]
    pub fn new(open: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(LatchState {
                open,
                waiters: HashMap::new(),
                next_key: 0,
            })),
        }
    }

    /// Opens the latch and wakes every queued waiter. Opening an open latch
    /// does nothing.
    pub fn open(&self) {
        let wakers = {
            let mut state = self.state.lock();
            if state.open {
                return;
            }
            state.open = true;
            state.wake_all()
        };
        trace!(released = wakers.len(), "latch opened");
        wakers.into_iter().for_each(Waker::wake);
    }

    /// Closes the latch. Later waiters queue until it opens again.
    pub fn close(&self) {
        self.state.lock().open = false;
    }

    /// Wakes every queued waiter without changing the open state.
    pub fn release(&self) {
        let wakers = self.state.lock().wake_all();
        trace!(released = wakers.len(), "latch released");
        wakers.into_iter().for_each(Waker::wake);
    }

    /// Returns true if the latch is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Number of waiters currently queued.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Waits until the latch is open or released.
    ///
    /// The wait is a suspension point: an interruption requested while the
    /// fiber is queued ends the effect with that interruption.
    #[must_use]
    pub fn await_open<E: Send + 'static>(&self) -> Effect<(), E> {
        let latch = self.clone();
        Effect::from_fn(move |ctx: FiberContext| {
            let wait = latch.wait();
            async move {
                match ctx.suspend(SuspendReason::Latch, wait).await {
                    Ok(()) => Exit::Success(()),
                    Err(by) => Exit::interrupt(by),
                }
            }
        })
    }

    /// Waits for the latch, then runs `effect`.
    #[must_use]
    pub fn when_open<A, E>(&self, effect: Effect<A, E>) -> Effect<A, E>
    where
        A: Send + 'static,
        E: Send + 'static,
    {
        self.await_open().zip_right(effect)
    }

    fn wait(&self) -> LatchWait {
        LatchWait {
            latch: self.clone(),
            key: None,
        }
    }
}

/// Future behind [`Latch::await_open`]. Owns at most one queue entry.
struct LatchWait {
    latch: Latch,
    key: Option<u64>,
}

impl Future for LatchWait {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.latch.state.lock();
        match self.key {
            // Queued: a missing entry means a release took it.
            Some(key) => match state.waiters.get_mut(&key) {
                Some(waker) => {
                    waker.clone_from(cx.waker());
                    Poll::Pending
                }
                None => {
                    drop(state);
                    self.key = None;
                    Poll::Ready(())
                }
            },
            None if state.open => Poll::Ready(()),
            None => {
                let key = state.next_key;
                state.next_key = state.next_key.wrapping_add(1);
                state.waiters.insert(key, cx.waker().clone());
                drop(state);
                self.key = Some(key);
                Poll::Pending
            }
        }
    }
}

impl Drop for LatchWait {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.latch.state.lock().waiters.remove(&key);
        }
    }
}
