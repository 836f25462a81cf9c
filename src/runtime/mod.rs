//! The runtime: owns the scheduler, the timer driver and the worker threads.
//!
//! # Flavors
//!
//! - **Current-thread**: fibers are driven by whichever thread blocks in
//!   [`Runtime::run`] or [`Runtime::await_fiber`]. Fibers forked with
//!   [`Runtime::fork`] make progress only while some thread is blocked on the
//!   runtime. This flavor can use a virtual clock.
//! - **Multi-thread**: a fixed pool of worker threads drives fibers; blocking
//!   calls only wait for completion.
//!
//! Dropping the runtime shuts it down. Fibers still running at that point
//! are dropped and complete with an interruption by [`FiberId::NONE`].

pub mod builder;
pub mod config;
pub mod env_config;
pub(crate) mod scheduler;
pub mod timer;
pub(crate) mod yield_now;

pub use builder::RuntimeBuilder;
pub use config::{RuntimeConfig, RuntimeFlavor};

use crate::effect::Effect;
use crate::effect::context::Context;
use crate::error::{Error, Result};
use crate::fiber::{self, ErasedFiber, FiberHandle, WaitDone};
use crate::time::{TimeSource, TimerDriver, VirtualClock, WallClock};
use crate::tracing_compat::{debug, info};
use crate::types::{Cause, Exit, FiberId, Time};
use parking_lot::Mutex;
use scheduler::{Scheduler, TaskFuture};
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

/// A cheap, cloneable reference to a running runtime.
#[derive(Clone)]
pub struct RuntimeHandle {
    scheduler: Arc<Scheduler>,
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl RuntimeHandle {
    /// Current time of the runtime's clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.scheduler.timer().now()
    }

    /// Forks `effect` as a new root fiber with an empty service context.
    pub fn fork<A, E>(&self, effect: Effect<A, E>) -> FiberHandle<A, E>
    where
        A: Send + 'static,
        E: Send + 'static,
    {
        fiber::spawn(self, effect, None, Context::new())
    }

    /// Number of fibers that have not completed.
    #[must_use]
    pub fn live_fibers(&self) -> usize {
        self.scheduler.live_fibers()
    }

    /// Returns true once the runtime has shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.scheduler.is_shutdown()
    }

    pub(crate) fn timer(&self) -> &Arc<TimerDriver> {
        self.scheduler.timer()
    }

    pub(crate) fn schedule_fiber(&self, id: FiberId, future: TaskFuture) {
        self.scheduler.spawn(id, future);
    }
}

/// An effect runtime.
///
/// ```
/// use effectus::{Effect, Exit, RuntimeBuilder};
///
/// let rt = RuntimeBuilder::current_thread().virtual_time(true).build().unwrap();
/// let exit = rt.run(
///     Effect::<_, String>::sleep(std::time::Duration::from_secs(60)).map(|()| "woke"),
/// );
/// assert_eq!(exit, Exit::succeed("woke"));
/// ```
pub struct Runtime {
    handle: RuntimeHandle,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", self.config())
            .field("workers", &self.workers.lock().len())
            .finish()
    }
}

impl Runtime {
    /// Builds a runtime from an already resolved configuration.
    pub fn with_config(mut config: RuntimeConfig) -> Result<Self> {
        config.normalize();
        config.validate()?;

        let (clock, virtual_clock): (Arc<dyn TimeSource>, Option<Arc<VirtualClock>>) =
            if config.virtual_time {
                let clock = Arc::new(VirtualClock::new());
                (clock.clone(), Some(clock))
            } else {
                (Arc::new(WallClock::new()), None)
            };
        let timer = Arc::new(TimerDriver::with_clock(clock));
        let scheduler = Scheduler::new(config.clone(), timer, virtual_clock);
        let runtime = Self {
            handle: RuntimeHandle {
                scheduler: Arc::clone(&scheduler),
            },
            workers: Mutex::new(Vec::new()),
        };

        if config.flavor == RuntimeFlavor::MultiThread {
            for index in 0..config.worker_threads {
                let worker = spawn_worker(&scheduler, &config, index).map_err(Error::Spawn)?;
                runtime.workers.lock().push(worker);
            }
        }

        info!(
            flavor = ?config.flavor,
            workers = runtime.workers.lock().len(),
            virtual_time = config.virtual_time,
            "runtime started"
        );
        Ok(runtime)
    }

    /// A cloneable handle to this runtime.
    #[must_use]
    pub const fn handle(&self) -> &RuntimeHandle {
        &self.handle
    }

    /// The resolved configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        self.handle.scheduler.config()
    }

    /// Current time of the runtime's clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.handle.now()
    }

    /// The virtual clock, when the runtime was built with virtual time.
    #[must_use]
    pub fn virtual_clock(&self) -> Option<Arc<VirtualClock>> {
        self.handle.scheduler.virtual_clock().cloned()
    }

    /// Forks `effect` as a root fiber and returns immediately.
    pub fn fork<A, E>(&self, effect: Effect<A, E>) -> FiberHandle<A, E>
    where
        A: Send + 'static,
        E: Send + 'static,
    {
        self.handle.fork(effect)
    }

    /// Runs `effect` to completion, blocking the calling thread.
    pub fn run<A, E>(&self, effect: Effect<A, E>) -> Exit<A, E>
    where
        A: Send + 'static,
        E: Send + 'static,
    {
        let fiber = self.fork(effect);
        self.block_until_done(&fiber.erased());
        fiber.take_exit()
    }

    /// Runs `effect` and converts the exit into a `Result`.
    pub fn run_to_result<A, E>(&self, effect: Effect<A, E>) -> std::result::Result<A, Cause<E>>
    where
        A: Send + 'static,
        E: Send + 'static,
    {
        self.run(effect).into_result()
    }

    /// Blocks until `fiber` completes and returns its exit.
    pub fn await_fiber<A, E>(&self, fiber: &FiberHandle<A, E>) -> Exit<A, E>
    where
        A: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        self.block_until_done(&fiber.erased());
        fiber
            .poll_exit()
            .unwrap_or_else(|| Exit::die("fiber completed without publishing an exit"))
    }

    /// Requests interruption of `fiber` from outside any fiber and blocks
    /// until it has unwound.
    pub fn interrupt<A, E>(&self, fiber: &FiberHandle<A, E>) -> Exit<A, E>
    where
        A: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        debug!(fiber = %fiber.id(), "interrupt requested from outside the runtime");
        fiber.request_interrupt(FiberId::NONE);
        self.await_fiber(fiber)
    }

    /// Stops the workers and drops every unfinished fiber. Idempotent.
    pub fn shutdown(&self) {
        self.handle.scheduler.shutdown();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        let current = std::thread::current().id();
        for worker in workers {
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
    }

    fn block_until_done(&self, fiber: &Arc<dyn ErasedFiber>) {
        let scheduler = &self.handle.scheduler;
        match scheduler.config().flavor {
            RuntimeFlavor::CurrentThread => {
                scheduler.drive_until(|| fiber.core().status().is_done());
            }
            RuntimeFlavor::MultiThread => {
                futures_lite::future::block_on(WaitDone::new(Arc::clone(fiber), FiberId::NONE));
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(
    scheduler: &Arc<Scheduler>,
    config: &RuntimeConfig,
    index: usize,
) -> std::io::Result<JoinHandle<()>> {
    let scheduler = Arc::clone(scheduler);
    let on_start = config.on_thread_start.clone();
    let on_stop = config.on_thread_stop.clone();
    std::thread::Builder::new()
        .name(format!("{}-{index}", config.thread_name_prefix))
        .stack_size(config.thread_stack_size)
        .spawn(move || {
            if let Some(callback) = on_start.as_ref() {
                callback();
            }
            scheduler.worker_loop(index);
            if let Some(callback) = on_stop.as_ref() {
                callback();
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Defect;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn current_thread_runs_to_completion() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("current_thread_runs_to_completion");

        let rt = crate::test_utils::test_runtime();
        let exit = rt.run(Effect::<_, ()>::succeed(20).map(|n| n + 1));
        crate::assert_exit_success!(exit, 21);
        assert_eq!(rt.handle().live_fibers(), 0);
        crate::test_complete!("current_thread_runs_to_completion");
    }

    #[test]
    fn virtual_time_skips_sleeps() {
        let rt = crate::test_utils::test_runtime();
        let started = std::time::Instant::now();
        let exit = rt.run(Effect::<(), ()>::sleep(Duration::from_secs(3600)));
        assert!(exit.is_success());
        assert_eq!(rt.now(), Time::from_secs(3600));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(rt.virtual_clock().is_some());
    }

    #[test]
    fn multi_thread_runs_hooks_and_fibers() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("multi_thread_runs_hooks_and_fibers");

        let started = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));
        let (s, t) = (Arc::clone(&started), Arc::clone(&stopped));
        let rt = RuntimeBuilder::multi_thread()
            .worker_threads(2)
            .thread_name_prefix("rt-test")
            .on_thread_start(move || {
                s.fetch_add(1, Ordering::SeqCst);
            })
            .on_thread_stop(move || {
                t.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .expect("runtime builds");

        let on_worker = rt.run(Effect::<_, ()>::sync(|| {
            std::thread::current()
                .name()
                .is_some_and(|name| name.starts_with("rt-test-"))
        }));
        crate::assert_exit_success!(on_worker, true);
        let exit = rt.run(Effect::<_, ()>::sleep(Duration::from_millis(5)).map(|()| 1));
        crate::assert_exit_success!(exit, 1);
        drop(rt);
        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(stopped.load(Ordering::SeqCst), 2);
        crate::test_complete!("multi_thread_runs_hooks_and_fibers");
    }

    #[test]
    fn external_interrupt_returns_interrupted_exit() {
        let rt = crate::test_utils::test_runtime();
        let fiber = rt.fork(Effect::<(), ()>::never());
        let exit = rt.interrupt(&fiber);
        let cause = crate::assert_exit_failure!(exit);
        assert_eq!(cause.interruptors(), vec![FiberId::NONE]);
    }

    #[test]
    fn panics_become_defects() {
        let rt = crate::test_utils::test_runtime();
        let exit = rt.run(Effect::<i32, ()>::sync(|| panic!("boom")));
        let cause = crate::assert_exit_failure!(exit);
        assert_eq!(cause.defects(), vec![&Defect::new("boom")]);
    }

    #[test]
    fn shutdown_completes_pending_fibers() {
        let rt = crate::test_utils::test_runtime();
        let fiber = rt.fork(Effect::<(), ()>::never());
        rt.shutdown();
        assert!(fiber.is_done());
        assert!(rt.handle().is_shutdown());
        let exit = rt.run(Effect::<_, ()>::succeed(1));
        assert!(exit.is_interrupted(), "a shut down runtime refuses new work");
    }
}
