//! Instrumented store for testing.
//!
//! Wraps [`InMemoryKeyValueStore`] and records how often each primitive was
//! called. Tests can script racing writes and transport failures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::storage::{
    CasOutcome, InMemoryKeyValueStore, KeyValueStore, Result, StorageError, VersionedValue,
};

/// Mock store with call counters and failure injection.
#[derive(Default)]
pub struct MockKeyValueStore {
    inner: InMemoryKeyValueStore,
    strong_gets: AtomicUsize,
    eventual_gets: AtomicUsize,
    cas_calls: AtomicUsize,
    /// Writes applied just before upcoming CAS calls, one per call.
    interference: Mutex<VecDeque<(String, String)>>,
    /// Number of upcoming CAS calls that fail with a transport error.
    failing_cas: AtomicUsize,
    fail_on_get: AtomicBool,
}

impl MockKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a key directly, bypassing counters.
    pub async fn put(&self, key: &str, value: impl Into<String>) -> VersionedValue {
        self.inner.put(key, value).await
    }

    /// Current stored value, bypassing counters.
    pub async fn value(&self, key: &str) -> String {
        self.inner
            .strong_get(key)
            .await
            .map(|v| v.value)
            .unwrap_or_default()
    }

    /// Make another writer land `value` on `key` right before the next CAS.
    pub async fn interfere_before_next_cas(&self, key: &str, value: impl Into<String>) {
        self.interference
            .lock()
            .await
            .push_back((key.to_string(), value.into()));
    }

    /// Fail the next `count` CAS calls with a transport error.
    pub fn fail_next_cas(&self, count: usize) {
        self.failing_cas.store(count, Ordering::SeqCst);
    }

    pub fn set_fail_on_get(&self, fail: bool) {
        self.fail_on_get.store(fail, Ordering::SeqCst);
    }

    pub fn strong_get_count(&self) -> usize {
        self.strong_gets.load(Ordering::SeqCst)
    }

    pub fn eventual_get_count(&self) -> usize {
        self.eventual_gets.load(Ordering::SeqCst)
    }

    pub fn cas_count(&self) -> usize {
        self.cas_calls.load(Ordering::SeqCst)
    }

    /// Total calls of any primitive.
    pub fn call_count(&self) -> usize {
        self.strong_get_count() + self.eventual_get_count() + self.cas_count()
    }

    fn check_get(&self) -> Result<()> {
        if self.fail_on_get.load(Ordering::SeqCst) {
            return Err(StorageError::Transport("injected read failure".to_string()));
        }
        Ok(())
    }

    fn take_cas_failure(&self) -> bool {
        self.failing_cas
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl KeyValueStore for MockKeyValueStore {
    async fn strong_get(&self, key: &str) -> Result<VersionedValue> {
        self.strong_gets.fetch_add(1, Ordering::SeqCst);
        self.check_get()?;
        self.inner.strong_get(key).await
    }

    async fn eventual_get(&self, key: &str) -> Result<VersionedValue> {
        self.eventual_gets.fetch_add(1, Ordering::SeqCst);
        self.check_get()?;
        self.inner.eventual_get(key).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_old: &str,
        new_value: &str,
    ) -> Result<CasOutcome> {
        self.cas_calls.fetch_add(1, Ordering::SeqCst);

        if self.take_cas_failure() {
            return Err(StorageError::Transport("injected CAS failure".to_string()));
        }

        let racing = self.interference.lock().await.pop_front();
        if let Some((racing_key, racing_value)) = racing {
            self.inner.put(&racing_key, racing_value).await;
        }

        self.inner
            .compare_and_swap(key, expected_old, new_value)
            .await
    }
}
