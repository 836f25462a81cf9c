//! Fiber scheduler.
//!
//! Runnable fibers sit in a single [`GlobalQueue`]. In current-thread mode
//! the thread that blocks on a result drives the queue itself; in
//! multi-thread mode a fixed set of workers does. Either way a driver runs
//! up to `poll_budget` tasks per tick, fires due timers between ticks, and
//! parks until the next timer deadline when nothing is runnable. With a
//! virtual clock the driver advances the clock to that deadline instead of
//! parking.

mod global_queue;
mod parker;
mod task;

pub(crate) use task::TaskFuture;

use self::global_queue::GlobalQueue;
use self::parker::Parker;
use self::task::FiberTask;
use crate::runtime::config::RuntimeConfig;
use crate::time::{TimerDriver, VirtualClock};
use crate::tracing_compat::{debug, trace};
use crate::types::FiberId;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) struct Scheduler {
    queue: GlobalQueue,
    timer: Arc<TimerDriver>,
    virtual_clock: Option<Arc<VirtualClock>>,
    parker: Parker,
    config: RuntimeConfig,
    // Live tasks, so shutdown can drop futures that are parked on wakers
    // nobody will fire.
    tasks: Mutex<HashMap<FiberId, Arc<FiberTask>>>,
    shutdown: AtomicBool,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("queued", &self.queue.len())
            .field("live", &self.tasks.lock().len())
            .field("timer", &self.timer)
            .field("virtual_time", &self.virtual_clock.is_some())
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .finish()
    }
}

impl Scheduler {
    pub(crate) fn new(
        config: RuntimeConfig,
        timer: Arc<TimerDriver>,
        virtual_clock: Option<Arc<VirtualClock>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue: GlobalQueue::new(),
            timer,
            virtual_clock,
            parker: Parker::new(config.driver_threads()),
            config,
            tasks: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        })
    }

    pub(crate) const fn timer(&self) -> &Arc<TimerDriver> {
        &self.timer
    }

    pub(crate) const fn virtual_clock(&self) -> Option<&Arc<VirtualClock>> {
        self.virtual_clock.as_ref()
    }

    pub(crate) const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Number of fibers that have not completed yet.
    pub(crate) fn live_fibers(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Registers a new fiber and queues its first poll.
    pub(crate) fn spawn(self: &Arc<Self>, id: FiberId, future: TaskFuture) {
        let task = FiberTask::new(id, future, Arc::downgrade(self));
        if self.is_shutdown() {
            // Dropping the future publishes an interruption exit.
            task.cancel();
            return;
        }
        self.tasks.lock().insert(id, Arc::clone(&task));
        self.enqueue(task);
    }

    pub(crate) fn enqueue(&self, task: Arc<FiberTask>) {
        self.queue.push(task);
        self.parker.unpark_one();
    }

    /// Fires due timers and runs up to one poll budget of tasks. Returns how
    /// many tasks were polled.
    pub(crate) fn tick(&self) -> usize {
        self.timer.process_timers();
        let budget = self.config.poll_budget.max(1) as usize;
        let mut polled = 0;
        while polled < budget {
            let Some(task) = self.queue.pop() else {
                break;
            };
            polled += 1;
            trace!(fiber = %task.id(), "polling fiber");
            if task.run() {
                self.tasks.lock().remove(&task.id());
            }
        }
        polled
    }

    /// Parks the calling thread until there is work, or moves virtual time
    /// forward to the next deadline.
    fn idle(&self) {
        let next = self.timer.next_deadline();
        match (next, &self.virtual_clock) {
            (Some(deadline), Some(clock)) => {
                trace!(deadline = %deadline, "advancing virtual clock");
                clock.advance_to(deadline);
            }
            (Some(deadline), None) => {
                let now = self.timer.now();
                if deadline > now {
                    self.parker.park(Some(deadline.duration_since(now)));
                }
            }
            (None, _) => self.parker.park(None),
        }
    }

    /// Drives the run queue on the calling thread until `done` holds.
    pub(crate) fn drive_until(&self, done: impl Fn() -> bool) {
        while !done() {
            let polled = self.tick();
            if done() {
                return;
            }
            if polled == 0 && self.queue.is_empty() {
                self.idle();
            }
        }
    }

    /// Body of a multi-thread worker.
    pub(crate) fn worker_loop(&self, index: usize) {
        debug!(worker = index, "worker started");
        while !self.is_shutdown() {
            let polled = self.tick();
            if polled == 0 && self.queue.is_empty() && !self.is_shutdown() {
                self.idle();
            }
        }
        debug!(worker = index, "worker stopped");
    }

    /// Stops the workers and drops every unfinished fiber.
    ///
    /// Fibers, timers and the queue all hold references back to the
    /// scheduler; clearing them here is what lets it be freed.
    pub(crate) fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.parker.unpark_all();

        let live: Vec<Arc<FiberTask>> = self.tasks.lock().drain().map(|(_, task)| task).collect();
        debug!(live = live.len(), "scheduler shutting down");
        for task in live {
            task.cancel();
        }
        self.timer.clear();
        self.queue.clear();
    }
}
