//! The schedulable unit: one fiber's type-erased future plus its wake state.
//!
//! A task is its own waker. Waking moves it into the run queue at most once
//! no matter how many wakers fire; a wake that arrives while the task is
//! being polled is remembered and re-queues the task after the poll.

use super::Scheduler;
use crate::types::FiberId;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};

pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

const IDLE: u8 = 0;
const SCHEDULED: u8 = 1;
const RUNNING: u8 = 2;
const NOTIFIED: u8 = 3;
const COMPLETE: u8 = 4;

pub(crate) struct FiberTask {
    id: FiberId,
    state: AtomicU8,
    future: Mutex<Option<TaskFuture>>,
    scheduler: Weak<Scheduler>,
}

impl fmt::Debug for FiberTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberTask")
            .field("fiber", &self.id)
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl FiberTask {
    /// Creates a task that is already marked as scheduled; the caller pushes
    /// it to the run queue.
    pub(crate) fn new(id: FiberId, future: TaskFuture, scheduler: Weak<Scheduler>) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: AtomicU8::new(SCHEDULED),
            future: Mutex::new(Some(future)),
            scheduler,
        })
    }

    pub(crate) const fn id(&self) -> FiberId {
        self.id
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMPLETE
    }

    fn schedule(self: &Arc<Self>) {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = match current {
                IDLE => SCHEDULED,
                RUNNING => NOTIFIED,
                _ => return,
            };
            match self
                .state
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if current == IDLE {
            self.enqueue();
        }
    }

    fn enqueue(self: &Arc<Self>) {
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.enqueue(Arc::clone(self));
        }
    }

    /// Polls the future once. Returns true when the task completed.
    pub(crate) fn run(self: &Arc<Self>) -> bool {
        if self
            .state
            .compare_exchange(SCHEDULED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return self.is_complete();
        }

        let waker = Waker::from(Arc::clone(self));
        let mut cx = Context::from_waker(&waker);
        let mut slot = self.future.lock();
        let Some(future) = slot.as_mut() else {
            self.state.store(COMPLETE, Ordering::Release);
            return true;
        };

        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                *slot = None;
                drop(slot);
                self.state.store(COMPLETE, Ordering::Release);
                true
            }
            Poll::Pending => {
                drop(slot);
                if self
                    .state
                    .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    // Woken during the poll.
                    self.state.store(SCHEDULED, Ordering::Release);
                    self.enqueue();
                }
                false
            }
        }
    }

    /// Drops the future without completing it. Used at shutdown.
    pub(crate) fn cancel(&self) {
        let future = self.future.lock().take();
        self.state.store(COMPLETE, Ordering::Release);
        drop(future);
    }
}

impl Wake for FiberTask {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}
