//! Runtime builder.

use super::Runtime;
use super::config::{RuntimeConfig, RuntimeFlavor};
use super::env_config::{apply_env_overrides, process_env};
use crate::error::Result;
use std::fmt;
use std::sync::Arc;

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Values set through builder methods. They win over every other layer.
#[derive(Clone, Default)]
struct Overrides {
    worker_threads: Option<usize>,
    thread_stack_size: Option<usize>,
    thread_name_prefix: Option<String>,
    poll_budget: Option<u32>,
    virtual_time: Option<bool>,
}

/// Builder for constructing a runtime with custom configuration.
///
/// ```
/// use effectus::{Effect, RuntimeBuilder};
///
/// let rt = RuntimeBuilder::current_thread().build().unwrap();
/// let exit = rt.run(Effect::<_, ()>::succeed(2).map(|n| n * 21));
/// assert_eq!(exit.value(), Some(&42));
/// ```
#[derive(Clone)]
pub struct RuntimeBuilder {
    flavor: RuntimeFlavor,
    overrides: Overrides,
    env: Option<EnvLookup>,
    #[cfg(feature = "config-file")]
    file: Option<std::path::PathBuf>,
    on_thread_start: Option<super::config::ThreadCallback>,
    on_thread_stop: Option<super::config::ThreadCallback>,
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("flavor", &self.flavor)
            .field("reads_env", &self.env.is_some())
            .finish_non_exhaustive()
    }
}

impl RuntimeBuilder {
    fn with_flavor(flavor: RuntimeFlavor) -> Self {
        Self {
            flavor,
            overrides: Overrides::default(),
            env: None,
            #[cfg(feature = "config-file")]
            file: None,
            on_thread_start: None,
            on_thread_stop: None,
        }
    }

    /// A runtime that drives fibers on the thread blocking on a result.
    #[must_use]
    pub fn current_thread() -> Self {
        Self::with_flavor(RuntimeFlavor::CurrentThread)
    }

    /// A runtime backed by a pool of worker threads.
    #[must_use]
    pub fn multi_thread() -> Self {
        Self::with_flavor(RuntimeFlavor::MultiThread)
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.overrides.worker_threads = Some(n);
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.overrides.thread_stack_size = Some(size);
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.overrides.thread_name_prefix = Some(prefix.into());
        self
    }

    /// Set the number of fibers polled per scheduler tick.
    #[must_use]
    pub fn poll_budget(mut self, budget: u32) -> Self {
        self.overrides.poll_budget = Some(budget);
        self
    }

    /// Drive time with a virtual clock that jumps to the next timer deadline
    /// whenever no fiber is runnable.
    #[must_use]
    pub fn virtual_time(mut self, enabled: bool) -> Self {
        self.overrides.virtual_time = Some(enabled);
        self
    }

    /// Register a callback to run when a worker thread starts.
    #[must_use]
    pub fn on_thread_start<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_thread_start = Some(Arc::new(f));
        self
    }

    /// Register a callback to run when a worker thread stops.
    #[must_use]
    pub fn on_thread_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_thread_stop = Some(Arc::new(f));
        self
    }

    /// Read `EFFECTUS_*` overrides from the process environment at build
    /// time.
    #[must_use]
    pub fn from_env(self) -> Self {
        self.from_env_with(process_env)
    }

    /// Read overrides through a custom variable lookup.
    #[must_use]
    pub fn from_env_with<L>(mut self, lookup: L) -> Self
    where
        L: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Some(Arc::new(lookup));
        self
    }

    /// Load settings from a TOML file at build time.
    #[cfg(feature = "config-file")]
    #[must_use]
    pub fn config_file(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Resolves every layer into a normalized, validated configuration.
    pub fn resolve(&self) -> Result<RuntimeConfig> {
        let mut config = RuntimeConfig {
            flavor: self.flavor,
            ..RuntimeConfig::default()
        };

        #[cfg(feature = "config-file")]
        if let Some(path) = &self.file {
            let parsed = super::env_config::parse_toml_file(path)?;
            super::env_config::apply_toml_config(&mut config, &parsed);
        }

        if let Some(lookup) = &self.env {
            apply_env_overrides(&mut config, |name| lookup(name))?;
        }

        let o = &self.overrides;
        if let Some(v) = o.worker_threads {
            config.worker_threads = v;
        }
        if let Some(v) = o.thread_stack_size {
            config.thread_stack_size = v;
        }
        if let Some(v) = &o.thread_name_prefix {
            config.thread_name_prefix.clone_from(v);
        }
        if let Some(v) = o.poll_budget {
            config.poll_budget = v;
        }
        if let Some(v) = o.virtual_time {
            config.virtual_time = v;
        }
        config.on_thread_start.clone_from(&self.on_thread_start);
        config.on_thread_stop.clone_from(&self.on_thread_stop);

        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Build a runtime from this configuration.
    pub fn build(self) -> Result<Runtime> {
        Runtime::with_config(self.resolve()?)
    }
}
