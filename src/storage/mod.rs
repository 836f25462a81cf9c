//! Key-value storage as an injected capability.
//!
//! Effects reach storage through a [`KeyValueStore`] provided in the fiber
//! context as a [`Storage`] service. The accessors [`get`], [`set`] and
//! [`remove`] read it from there, so the same program runs against any
//! backend:
//!
//! ```
//! use effectus::storage::{self, MemoryKeyValueStore, Storage};
//! use effectus::RuntimeBuilder;
//!
//! let program = storage::set("greeting", b"hello".to_vec())
//!     .zip_right(storage::get("greeting"))
//!     .provide_service(Storage::new(MemoryKeyValueStore::new()));
//!
//! let rt = RuntimeBuilder::current_thread().build().unwrap();
//! assert_eq!(rt.run(program).value(), Some(&Some(b"hello".to_vec())));
//! ```

mod memory;

pub use memory::{MemoryKeyValueStore, StorageQuota};

use crate::effect::Effect;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Raw stored value.
pub type Bytes = Vec<u8>;

/// Failure of a storage operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Writing would exceed the entry limit.
    #[error("storage entry limit exceeded: {projected} entries, limit {limit}")]
    EntryCountExceeded {
        /// Entry count after the write.
        projected: usize,
        /// Configured limit.
        limit: usize,
    },
    /// Writing would exceed the byte quota.
    #[error("storage quota exceeded: {projected_bytes} bytes, limit {limit_bytes}")]
    QuotaExceeded {
        /// Stored bytes after the write.
        projected_bytes: usize,
        /// Configured limit.
        limit_bytes: usize,
    },
    /// The key is not acceptable to the backend.
    #[error("invalid storage key {0:?}")]
    InvalidKey(String),
    /// The backend failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A key-value backend. Every operation is an effect and composes with the
/// rest of a program.
pub trait KeyValueStore: Send + Sync {
    /// Reads the value under `key`.
    fn get(&self, key: &str) -> Effect<Option<Bytes>, StorageError>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: Bytes) -> Effect<(), StorageError>;

    /// Deletes `key`. Removing a missing key succeeds.
    fn remove(&self, key: &str) -> Effect<(), StorageError>;
}

/// The context service through which effects reach a [`KeyValueStore`].
#[derive(Clone)]
pub struct Storage {
    store: Arc<dyn KeyValueStore>,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

impl Storage {
    /// Wraps a backend.
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// Wraps a shared backend.
    #[must_use]
    pub fn from_arc(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The wrapped backend.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }
}

/// Reads `key` from the context's storage.
#[must_use]
pub fn get(key: impl Into<String>) -> Effect<Option<Bytes>, StorageError> {
    let key = key.into();
    Effect::<Arc<Storage>, StorageError>::service().flat_map(move |storage| storage.store.get(&key))
}

/// Writes `value` under `key` in the context's storage.
#[must_use]
pub fn set(key: impl Into<String>, value: Bytes) -> Effect<(), StorageError> {
    let key = key.into();
    Effect::<Arc<Storage>, StorageError>::service()
        .flat_map(move |storage| storage.store.set(&key, value.clone()))
}

/// Deletes `key` from the context's storage.
#[must_use]
pub fn remove(key: impl Into<String>) -> Effect<(), StorageError> {
    let key = key.into();
    Effect::<Arc<Storage>, StorageError>::service()
        .flat_map(move |storage| storage.store.remove(&key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::run_test;

    #[test]
    fn accessors_use_the_provided_store() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("accessors_use_the_provided_store");

        let store = MemoryKeyValueStore::new();
        let program = set("a", vec![1, 2])
            .zip_right(set("b", vec![3]))
            .zip_right(remove("a"))
            .zip_right(get("a").zip(get("b")))
            .provide_service(Storage::new(store.clone()));

        crate::assert_exit_success!(run_test(program), (None::<Bytes>, Some(vec![3])));
        assert_eq!(store.keys(), vec!["b".to_string()]);
        crate::test_complete!("accessors_use_the_provided_store");
    }

    #[test]
    fn missing_storage_is_a_defect() {
        let cause = crate::assert_exit_failure!(run_test(get("a")));
        assert!(cause.is_die());
        let message = cause.defects()[0].message().to_string();
        assert!(message.contains("Storage"), "{message}");
    }

    #[test]
    fn errors_render_their_limits() {
        let err = StorageError::QuotaExceeded {
            projected_bytes: 12,
            limit_bytes: 10,
        };
        assert_eq!(err.to_string(), "storage quota exceeded: 12 bytes, limit 10");
    }
}
