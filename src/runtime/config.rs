//! Runtime configuration.

use crate::error::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// Default name prefix for worker threads.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "effectus-worker";

/// Default worker stack size (2 MiB).
pub const DEFAULT_THREAD_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Default number of fibers polled per scheduler tick.
pub const DEFAULT_POLL_BUDGET: u32 = 128;

/// How fibers are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeFlavor {
    /// Fibers run on the thread that blocks on a result.
    #[default]
    CurrentThread,
    /// Fibers run on a pool of worker threads.
    MultiThread,
}

/// Callback run on worker thread start or stop.
pub type ThreadCallback = Arc<dyn Fn() + Send + Sync>;

/// Runtime configuration.
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Current-thread or multi-thread.
    pub flavor: RuntimeFlavor,
    /// Number of worker threads (default: available parallelism). Ignored in
    /// current-thread mode.
    pub worker_threads: usize,
    /// Stack size per worker thread.
    pub thread_stack_size: usize,
    /// Name prefix for worker threads.
    pub thread_name_prefix: String,
    /// Fibers polled per scheduler tick before timers are checked again.
    pub poll_budget: u32,
    /// Drive time with a virtual clock. Current-thread only.
    pub virtual_time: bool,
    /// Callback executed when a worker thread starts.
    pub on_thread_start: Option<ThreadCallback>,
    /// Callback executed when a worker thread stops.
    pub on_thread_stop: Option<ThreadCallback>,
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("flavor", &self.flavor)
            .field("worker_threads", &self.worker_threads)
            .field("thread_stack_size", &self.thread_stack_size)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("poll_budget", &self.poll_budget)
            .field("virtual_time", &self.virtual_time)
            .field("on_thread_start", &self.on_thread_start.is_some())
            .field("on_thread_stop", &self.on_thread_stop.is_some())
            .finish()
    }
}

impl RuntimeConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.worker_threads == 0 {
            self.worker_threads = 1;
        }
        if self.thread_stack_size == 0 {
            self.thread_stack_size = DEFAULT_THREAD_STACK_SIZE;
        }
        if self.poll_budget == 0 {
            self.poll_budget = 1;
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = DEFAULT_THREAD_NAME_PREFIX.to_string();
        }
    }

    /// Rejects combinations the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.virtual_time && self.flavor == RuntimeFlavor::MultiThread {
            return Err(Error::Config(
                "virtual time requires the current-thread flavor".into(),
            ));
        }
        Ok(())
    }

    /// Threads that drive the run queue.
    pub(crate) const fn driver_threads(&self) -> usize {
        match self.flavor {
            RuntimeFlavor::CurrentThread => 1,
            RuntimeFlavor::MultiThread => self.worker_threads,
        }
    }

    pub(crate) fn default_worker_threads() -> usize {
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .max(1)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flavor: RuntimeFlavor::default(),
            worker_threads: Self::default_worker_threads(),
            thread_stack_size: DEFAULT_THREAD_STACK_SIZE,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            poll_budget: DEFAULT_POLL_BUDGET,
            virtual_time: false,
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}
