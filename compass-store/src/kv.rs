//! Key-value store abstraction.
//!
//! The client only uses this to mirror session tokens for tamper
//! detection, but the trait is deliberately minimal so hosts can back it
//! with whatever persisted storage they have (browser storage, a secrets
//! file, a database row). The in-memory implementation is the default for
//! tests and ephemeral runtimes.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use compass_core::{CompassResult, StoreError};

/// Async key-value storage for small string values.
///
/// Implementations must be thread-safe and must treat keys as opaque.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value, or None when the key has never been set (or was removed).
    async fn get(&self, key: &str) -> CompassResult<Option<String>>;

    /// Set a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> CompassResult<()>;

    /// Remove a key. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> CompassResult<()>;
}

/// In-memory key-value store.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> CompassResult<Option<String>> {
        let entries = self.entries.read().map_err(|_| StoreError::Backend {
            key: key.to_string(),
            reason: "lock poisoned".to_string(),
        })?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> CompassResult<()> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Backend {
            key: key.to_string(),
            reason: "lock poisoned".to_string(),
        })?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> CompassResult<()> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Backend {
            key: key.to_string(),
            reason: "lock poisoned".to_string(),
        })?;
        entries.remove(key);
        Ok(())
    }
}
