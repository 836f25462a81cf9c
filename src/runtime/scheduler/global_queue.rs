//! Global run queue.
//!
//! A thread-safe unbounded queue of runnable fibers shared by every worker
//! (or by the single driving thread in current-thread mode).

use super::task::FiberTask;
use crossbeam_queue::SegQueue;
use std::fmt;
use std::sync::Arc;

/// The run queue.
#[derive(Default)]
pub(crate) struct GlobalQueue {
    inner: SegQueue<Arc<FiberTask>>,
}

impl fmt::Debug for GlobalQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalQueue")
            .field("len", &self.inner.len())
            .finish()
    }
}

impl GlobalQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, task: Arc<FiberTask>) {
        self.inner.push(task);
    }

    pub(crate) fn pop(&self) -> Option<Arc<FiberTask>> {
        self.inner.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Removes every queued task.
    pub(crate) fn clear(&self) {
        while self.inner.pop().is_some() {}
    }
}
