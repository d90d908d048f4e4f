//! Storage client for the remote versioned key-value store.
//!
//! The store is reachable only through optimistic-concurrency primitives:
//! linearizable reads and compare-and-swap. Every aggregate mutation funnels
//! through [`reduce::idempotent_reduce_until_success`].
//!
//! - `memory`: in-process store handle for standalone mode
//! - `http`: `reqwest` client for the remote store API
//! - `mock`: instrumented store for tests (call counts, injected conflicts)

pub mod http;
pub mod memory;
pub mod mock;
pub mod reduce;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

pub use http::HttpKeyValueStore;
pub use memory::InMemoryKeyValueStore;
pub use mock::MockKeyValueStore;
pub use reduce::{idempotent_reduce_until_success, ReduceError, ReduceOutcome, ReducePolicy};

/// Errors returned by store implementations.
///
/// A CAS conflict is not an error; see [`CasOutcome::Conflict`].
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} for key {key}: {body}")]
    UnexpectedStatus {
        key: String,
        status: u16,
        body: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// The unit the store returns from a read and compares against on CAS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedValue {
    pub version: u64,
    pub value: String,
}

impl VersionedValue {
    pub fn new(version: u64, value: impl Into<String>) -> Self {
        Self {
            version,
            value: value.into(),
        }
    }

    /// True for the implicit value of a key that was never written.
    pub fn is_absent(&self) -> bool {
        self.version == 0 && self.value.is_empty()
    }
}

/// Result of a compare-and-swap that reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The expected value matched and the new value is now stored.
    Swapped { version: u64 },
    /// The stored value no longer equals the expected value.
    Conflict,
}

/// Interface to the remote versioned key-value store.
///
/// A missing key behaves as an empty string at version 0, both for reads and
/// as the expected old value of a CAS.
///
/// # Implementations
///
/// - `InMemoryKeyValueStore`: process-local store
/// - `HttpKeyValueStore`: remote store over HTTP
/// - `MockKeyValueStore`: instrumented store for testing
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Linearizable read.
    async fn strong_get(&self, key: &str) -> Result<VersionedValue>;

    /// Possibly stale read.
    async fn eventual_get(&self, key: &str) -> Result<VersionedValue>;

    /// Atomically replace `expected_old` with `new_value`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_old: &str,
        new_value: &str,
    ) -> Result<CasOutcome>;
}

/// Store backend selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Memory,
    Http,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend type.
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// Base URL of the remote store (http backend only).
    pub endpoint: String,
    /// Per-request timeout in milliseconds (http backend only).
    pub timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Memory,
            endpoint: "http://localhost:8500".to_string(),
            timeout_ms: 5_000,
        }
    }
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Initialize the store selected by configuration.
pub fn init_store(config: &StorageConfig) -> Result<Arc<dyn KeyValueStore>> {
    match config.storage_type {
        StorageType::Memory => {
            info!("Storage: in-memory");
            Ok(Arc::new(InMemoryKeyValueStore::new()))
        }
        StorageType::Http => {
            info!(endpoint = %config.endpoint, "Storage: http");
            Ok(Arc::new(HttpKeyValueStore::new(
                &config.endpoint,
                config.timeout(),
            )?))
        }
    }
}
