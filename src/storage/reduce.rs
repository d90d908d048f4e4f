//! Idempotent-reduce-until-success: the single chokepoint for store writes.
//!
//! A reducer maps whatever the store currently holds to the value that should
//! replace it. On conflict or transport failure the authoritative value is
//! re-read and the reducer recomputed against it, so the reducer may run
//! several times for one logical command and must be safe to re-apply.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::Retryable;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{CasOutcome, KeyValueStore, StorageError};
use crate::utils::retry::commit_backoff;

/// A reducer or validator refused the change. Carries the caller-facing message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Rejection(pub String);

impl Rejection {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Retry bounds for a reduce loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReducePolicy {
    /// Upper bound on CAS attempts, including the first.
    pub max_retries: u32,
    /// Fixed pause between attempts.
    #[serde(with = "crate::utils::millis", rename = "retry_delay_ms")]
    pub retry_delay: Duration,
}

impl Default for ReducePolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_delay: Duration::from_millis(50),
        }
    }
}

/// Terminal failure of a reduce loop.
#[derive(Debug, thiserror::Error)]
pub enum ReduceError {
    #[error("Rejected: {0}")]
    Rejected(Rejection),

    #[error("Gave up on {key} after {attempts} attempts: {last_error}")]
    Exhausted {
        key: String,
        attempts: u32,
        last_error: String,
    },
}

/// Successful reduce loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReduceOutcome {
    /// The value now held by the store.
    pub value: String,
    /// Version reported by the store, `None` when no write was needed.
    pub version: Option<u64>,
    /// Attempts used, including the first.
    pub attempts: u32,
}

#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("CAS conflict")]
    Conflict,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Rejected(Rejection),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        !matches!(self, AttemptError::Rejected(_))
    }
}

/// Apply `reducer` to the value under `key` until a CAS lands.
///
/// The first attempt uses `observed_old` as the expected value. After a
/// conflict or transport error the next attempt re-reads the key with
/// `strong_get` first. When the reducer returns its input unchanged the
/// change is already present and no write is issued.
pub async fn idempotent_reduce_until_success<F>(
    store: &dyn KeyValueStore,
    key: &str,
    observed_old: String,
    reducer: F,
    policy: &ReducePolicy,
) -> Result<ReduceOutcome, ReduceError>
where
    F: Fn(&str) -> Result<String, Rejection> + Send + Sync,
{
    // None means the cached value is known stale.
    let current = Mutex::new(Some(observed_old));
    let attempts = AtomicU32::new(0);

    let current = &current;
    let attempts = &attempts;
    let reducer = &reducer;

    let attempt = || async move {
        attempts.fetch_add(1, Ordering::SeqCst);

        let cached = current.lock().await.clone();
        let old = match cached {
            Some(value) => value,
            None => {
                let fresh = store.strong_get(key).await?;
                *current.lock().await = Some(fresh.value.clone());
                fresh.value
            }
        };

        let new = reducer(&old).map_err(AttemptError::Rejected)?;
        if new == old {
            return Ok((new, None));
        }

        match store.compare_and_swap(key, &old, &new).await {
            Ok(CasOutcome::Swapped { version }) => Ok((new, Some(version))),
            Ok(CasOutcome::Conflict) => {
                *current.lock().await = None;
                Err(AttemptError::Conflict)
            }
            Err(e) => {
                *current.lock().await = None;
                Err(AttemptError::Storage(e))
            }
        }
    };

    let result = attempt
        .retry(commit_backoff(policy))
        .when(AttemptError::is_retryable)
        .notify(|err: &AttemptError, delay: Duration| {
            debug!(%key, error = %err, ?delay, "Retrying CAS against refreshed value");
        })
        .await;

    let attempts = attempts.load(Ordering::SeqCst);
    match result {
        Ok((value, version)) => Ok(ReduceOutcome {
            value,
            version,
            attempts,
        }),
        Err(AttemptError::Rejected(rejection)) => Err(ReduceError::Rejected(rejection)),
        Err(err) => {
            warn!(%key, attempts, error = %err, "CAS retries exhausted");
            Err(ReduceError::Exhausted {
                key: key.to_string(),
                attempts,
                last_error: err.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MockKeyValueStore;

    fn fast_policy(max_retries: u32) -> ReducePolicy {
        ReducePolicy {
            max_retries,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn append(suffix: &'static str) -> impl Fn(&str) -> Result<String, Rejection> + Send + Sync {
        move |old: &str| {
            if old.is_empty() {
                Ok(suffix.to_string())
            } else {
                Ok(format!("{old},{suffix}"))
            }
        }
    }

    #[tokio::test]
    async fn test_first_attempt_succeeds() {
        let store = MockKeyValueStore::new();

        let outcome = idempotent_reduce_until_success(
            &store,
            "k",
            String::new(),
            append("a"),
            &fast_policy(3),
        )
        .await
        .unwrap();

        assert_eq!(outcome.value, "a");
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.version, Some(1));
        assert_eq!(store.cas_count(), 1);
        assert_eq!(store.strong_get_count(), 0);
    }

    #[tokio::test]
    async fn test_conflict_reapplies_reducer_to_latest_value() {
        let store = MockKeyValueStore::new();
        store.put("k", "a").await;
        store.interfere_before_next_cas("k", "a,b").await;

        let outcome = idempotent_reduce_until_success(
            &store,
            "k",
            "a".to_string(),
            append("c"),
            &fast_policy(3),
        )
        .await
        .unwrap();

        assert_eq!(outcome.attempts, 2);
        assert_eq!(store.value("k").await, "a,b,c");
        assert_eq!(store.strong_get_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_observed_value_recovers() {
        let store = MockKeyValueStore::new();
        store.put("k", "fresh").await;

        let outcome = idempotent_reduce_until_success(
            &store,
            "k",
            "stale".to_string(),
            append("x"),
            &fast_policy(3),
        )
        .await
        .unwrap();

        assert_eq!(outcome.value, "fresh,x");
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried() {
        let store = MockKeyValueStore::new();
        store.fail_next_cas(2);

        let outcome = idempotent_reduce_until_success(
            &store,
            "k",
            String::new(),
            append("a"),
            &fast_policy(5),
        )
        .await
        .unwrap();

        assert_eq!(outcome.attempts, 3);
        assert_eq!(store.value("k").await, "a");
    }

    #[tokio::test]
    async fn test_exhausted_after_max_retries() {
        let store = MockKeyValueStore::new();
        for i in 0..3 {
            store.interfere_before_next_cas("k", format!("other-{i}")).await;
        }

        let err = idempotent_reduce_until_success(
            &store,
            "k",
            String::new(),
            append("a"),
            &fast_policy(3),
        )
        .await
        .unwrap_err();

        match err {
            ReduceError::Exhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(store.cas_count(), 3);
        assert_eq!(store.value("k").await, "other-2");
    }

    #[tokio::test]
    async fn test_rejection_stops_without_write() {
        let store = MockKeyValueStore::new();

        let err = idempotent_reduce_until_success(
            &store,
            "k",
            String::new(),
            |_: &str| Err(Rejection::new("Username already exists")),
            &fast_policy(5),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ReduceError::Rejected(r) if r.message() == "Username already exists"));
        assert_eq!(store.cas_count(), 0);
    }

    #[tokio::test]
    async fn test_unchanged_value_skips_cas() {
        let store = MockKeyValueStore::new();
        store.put("k", "same").await;

        let outcome = idempotent_reduce_until_success(
            &store,
            "k",
            "same".to_string(),
            |old: &str| Ok(old.to_string()),
            &fast_policy(3),
        )
        .await
        .unwrap();

        assert_eq!(outcome.version, None);
        assert_eq!(store.cas_count(), 0);
    }

    #[test]
    fn test_policy_deserializes_millis() {
        let policy: ReducePolicy =
            serde_json::from_str(r#"{"max_retries": 4, "retry_delay_ms": 25}"#).unwrap();
        assert_eq!(policy.max_retries, 4);
        assert_eq!(policy.retry_delay, Duration::from_millis(25));
    }
}
