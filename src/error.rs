//! Library error types.
//!
//! Effects report their own failures through [`Cause`](crate::Cause); the
//! errors here cover the runtime itself: building it and loading its
//! configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while configuring or building a runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// An environment variable held a value that could not be parsed.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// What the variable should contain.
        expected: &'static str,
        /// The raw value found.
        value: String,
    },
    /// The combination of settings is not supported.
    #[error("invalid runtime configuration: {0}")]
    Config(String),
    /// A configuration file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    ConfigFile {
        /// Path of the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A configuration file could not be parsed.
    #[error("failed to parse TOML config: {0}")]
    ConfigParse(String),
    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// A specialized `Result` for runtime construction.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_setting() {
        let err = Error::InvalidEnv {
            var: "EFFECTUS_WORKER_THREADS",
            expected: "unsigned integer",
            value: "many".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("EFFECTUS_WORKER_THREADS"), "{msg}");
        assert!(msg.contains("\"many\""), "{msg}");

        let err = Error::ConfigFile {
            path: PathBuf::from("/nope.toml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("/nope.toml"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
