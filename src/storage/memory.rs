//! Deterministic in-memory backend.

use super::{Bytes, KeyValueStore, StorageError};
use crate::effect::Effect;
use crate::tracing_compat::{debug, trace};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Limits enforced by [`MemoryKeyValueStore`] on writes.
///
/// An entry's size is the length of its key plus the length of its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageQuota {
    /// Maximum number of entries.
    pub max_entries: usize,
    /// Maximum total size of all entries in bytes.
    pub max_total_bytes: usize,
}

impl Default for StorageQuota {
    fn default() -> Self {
        Self {
            max_entries: usize::MAX,
            max_total_bytes: usize::MAX,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: BTreeMap<String, Bytes>,
    used_bytes: usize,
}

/// Storage backed by a `BTreeMap`. Key enumeration order is stable.
///
/// Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    state: Arc<Mutex<MemoryState>>,
    quota: StorageQuota,
}

const fn entry_size(key: &str, value_len: usize) -> usize {
    key.len().saturating_add(value_len)
}

fn check_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        Err(StorageError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

impl MemoryKeyValueStore {
    /// An empty store without limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty store enforcing `quota`.
    #[must_use]
    pub fn with_quota(quota: StorageQuota) -> Self {
        Self {
            state: Arc::default(),
            quota,
        }
    }

    /// Total size of the stored entries.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.state.lock().used_bytes
    }

    /// Number of stored entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Stored keys in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().entries.keys().cloned().collect()
    }

    fn write(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
        check_key(key)?;
        let mut state = self.state.lock();
        let old_size = state
            .entries
            .get(key)
            .map_or(0, |old| entry_size(key, old.len()));
        let projected = if state.entries.contains_key(key) {
            state.entries.len()
        } else {
            state.entries.len() + 1
        };
        if projected > self.quota.max_entries {
            debug!(key, projected, limit = self.quota.max_entries, "storage entry limit hit");
            return Err(StorageError::EntryCountExceeded {
                projected,
                limit: self.quota.max_entries,
            });
        }
        let projected_bytes = (state.used_bytes - old_size).saturating_add(entry_size(key, value.len()));
        if projected_bytes > self.quota.max_total_bytes {
            debug!(key, projected_bytes, limit = self.quota.max_total_bytes, "storage quota hit");
            return Err(StorageError::QuotaExceeded {
                projected_bytes,
                limit_bytes: self.quota.max_total_bytes,
            });
        }
        trace!(key, bytes = value.len(), "storage set");
        state.used_bytes = projected_bytes;
        state.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) {
        let mut state = self.state.lock();
        if let Some(old) = state.entries.remove(key) {
            state.used_bytes = state.used_bytes.saturating_sub(entry_size(key, old.len()));
        }
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Effect<Option<Bytes>, StorageError> {
        let store = self.clone();
        let key = key.to_string();
        Effect::try_sync(move || {
            check_key(&key)?;
            Ok(store.state.lock().entries.get(&key).cloned())
        })
    }

    fn set(&self, key: &str, value: Bytes) -> Effect<(), StorageError> {
        let store = self.clone();
        let key = key.to_string();
        Effect::try_sync(move || store.write(&key, value.clone()))
    }

    fn remove(&self, key: &str) -> Effect<(), StorageError> {
        let store = self.clone();
        let key = key.to_string();
        Effect::try_sync(move || {
            check_key(&key)?;
            store.delete(&key);
            Ok(())
        })
    }
}
