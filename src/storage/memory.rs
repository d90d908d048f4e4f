//! In-process key-value store.
//!
//! Passed explicitly into constructors; there is no global instance.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{CasOutcome, KeyValueStore, Result, VersionedValue};

/// Key-value store held in memory with value-equality compare-and-swap.
#[derive(Default)]
pub struct InMemoryKeyValueStore {
    entries: RwLock<HashMap<String, VersionedValue>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditionally write a value, bumping the version.
    ///
    /// Models a write by another process racing with this one.
    pub async fn put(&self, key: &str, value: impl Into<String>) -> VersionedValue {
        let mut entries = self.entries.write().await;
        let version = entries.get(key).map(|v| v.version).unwrap_or(0) + 1;
        let stored = VersionedValue::new(version, value);
        entries.insert(key.to_string(), stored.clone());
        stored
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn read(&self, key: &str) -> VersionedValue {
        self.entries
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn strong_get(&self, key: &str) -> Result<VersionedValue> {
        Ok(self.read(key).await)
    }

    async fn eventual_get(&self, key: &str) -> Result<VersionedValue> {
        Ok(self.read(key).await)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_old: &str,
        new_value: &str,
    ) -> Result<CasOutcome> {
        let mut entries = self.entries.write().await;
        let current = entries.get(key);
        let current_value = current.map(|v| v.value.as_str()).unwrap_or("");

        if current_value != expected_old {
            debug!(%key, "CAS conflict");
            return Ok(CasOutcome::Conflict);
        }

        let version = current.map(|v| v.version).unwrap_or(0) + 1;
        entries.insert(key.to_string(), VersionedValue::new(version, new_value));
        Ok(CasOutcome::Swapped { version })
    }
}
