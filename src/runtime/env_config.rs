//! Environment variable and config file support for
//! [`RuntimeBuilder`](super::builder::RuntimeBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`worker_threads(4)`)
//! 2. **Environment variables**: values from `EFFECTUS_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `EFFECTUS_WORKER_THREADS` | `usize` | `worker_threads` |
//! | `EFFECTUS_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//! | `EFFECTUS_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `EFFECTUS_POLL_BUDGET` | `u32` | `poll_budget` |
//! | `EFFECTUS_VIRTUAL_TIME` | `bool` | `virtual_time` |

use crate::error::{Error, Result};
use crate::runtime::config::RuntimeConfig;

/// Environment variable name for worker thread count.
pub const ENV_WORKER_THREADS: &str = "EFFECTUS_WORKER_THREADS";
/// Environment variable name for thread stack size.
pub const ENV_THREAD_STACK_SIZE: &str = "EFFECTUS_THREAD_STACK_SIZE";
/// Environment variable name for thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "EFFECTUS_THREAD_NAME_PREFIX";
/// Environment variable name for the cooperative poll budget.
pub const ENV_POLL_BUDGET: &str = "EFFECTUS_POLL_BUDGET";
/// Environment variable name for the virtual time toggle.
pub const ENV_VIRTUAL_TIME: &str = "EFFECTUS_VIRTUAL_TIME";

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// `lookup` returns the value of a variable, or `None` when it is unset.
/// Only variables that are set are applied. Returns an error if a variable
/// is set but contains an unparseable value.
pub fn apply_env_overrides<L>(config: &mut RuntimeConfig, lookup: L) -> Result<()>
where
    L: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup(ENV_WORKER_THREADS) {
        config.worker_threads = parse_usize(ENV_WORKER_THREADS, &val)?;
    }
    if let Some(val) = lookup(ENV_THREAD_STACK_SIZE) {
        config.thread_stack_size = parse_usize(ENV_THREAD_STACK_SIZE, &val)?;
    }
    if let Some(val) = lookup(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = lookup(ENV_POLL_BUDGET) {
        config.poll_budget = parse_u32(ENV_POLL_BUDGET, &val)?;
    }
    if let Some(val) = lookup(ENV_VIRTUAL_TIME) {
        config.virtual_time = parse_bool(ENV_VIRTUAL_TIME, &val)?;
    }
    Ok(())
}

/// Reads a variable from the process environment.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize> {
    val.trim().parse::<usize>().map_err(|_| Error::InvalidEnv {
        var,
        expected: "unsigned integer",
        value: val.to_string(),
    })
}

fn parse_u32(var: &'static str, val: &str) -> Result<u32> {
    val.trim().parse::<u32>().map_err(|_| Error::InvalidEnv {
        var,
        expected: "u32",
        value: val.to_string(),
    })
}

fn parse_bool(var: &'static str, val: &str) -> Result<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidEnv {
            var,
            expected: "bool (true/false/1/0/yes/no)",
            value: val.to_string(),
        }),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable runtime configuration.
///
/// ```toml
/// [scheduler]
/// worker_threads = 4
/// poll_budget = 128
/// thread_stack_size = 2097152
/// thread_name_prefix = "myapp-worker"
/// virtual_time = false
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct RuntimeTomlConfig {
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerToml,
}

/// Scheduler section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct SchedulerToml {
    /// Number of worker threads.
    pub worker_threads: Option<usize>,
    /// Cooperative poll budget.
    pub poll_budget: Option<u32>,
    /// Stack size per worker thread in bytes.
    pub thread_stack_size: Option<usize>,
    /// Name prefix for worker threads.
    pub thread_name_prefix: Option<String>,
    /// Drive time with a virtual clock.
    pub virtual_time: Option<bool>,
}

/// Apply a parsed TOML config to a [`RuntimeConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut RuntimeConfig, toml: &RuntimeTomlConfig) {
    if let Some(v) = toml.scheduler.worker_threads {
        config.worker_threads = v;
    }
    if let Some(v) = toml.scheduler.poll_budget {
        config.poll_budget = v;
    }
    if let Some(v) = toml.scheduler.thread_stack_size {
        config.thread_stack_size = v;
    }
    if let Some(ref v) = toml.scheduler.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
    if let Some(v) = toml.scheduler.virtual_time {
        config.virtual_time = v;
    }
}

/// Parse a TOML string into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<RuntimeTomlConfig> {
    toml::from_str(toml_str).map_err(|e| Error::ConfigParse(e.to_string()))
}

/// Read and parse a TOML file into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RuntimeTomlConfig> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigFile {
        path: path.to_path_buf(),
        source,
    })?;
    parse_toml_str(&content)
}
