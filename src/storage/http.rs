//! HTTP client for the remote key-value store.
//!
//! API:
//! - `GET {endpoint}/kv/{key}?consistency=strong|eventual` -> `{version, value}`,
//!   404 for a key that was never written; `{key}` is a single percent-encoded segment
//! - `POST {endpoint}/kv/cas` with `{key, oldValue, newValue}` -> 2xx when
//!   swapped (`{version}` body), 409/412 on conflict
//!
//! Any other status is a transport error; retries belong to the caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CasOutcome, KeyValueStore, Result, StorageError, VersionedValue};

/// Read consistency requested from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    Strong,
    Eventual,
}

impl Consistency {
    fn as_str(self) -> &'static str {
        match self {
            Consistency::Strong => "strong",
            Consistency::Eventual => "eventual",
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CasRequest<'a> {
    key: &'a str,
    old_value: &'a str,
    new_value: &'a str,
}

#[derive(Deserialize)]
struct CasResponse {
    #[serde(default)]
    version: u64,
}

/// Remote store reached over HTTP.
pub struct HttpKeyValueStore {
    client: Client,
    endpoint: Url,
}

impl HttpKeyValueStore {
    /// Create a client for the store at `endpoint`.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.trim_end_matches('/');
        if endpoint.is_empty() {
            return Err(StorageError::Config(
                "Store endpoint not configured".to_string(),
            ));
        }

        let endpoint = Url::parse(endpoint)
            .map_err(|e| StorageError::Config(format!("Invalid store endpoint {endpoint}: {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(StorageError::Config(format!(
                "Store endpoint {endpoint} cannot carry a path"
            )));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self { client, endpoint })
    }

    /// Endpoint plus percent-encoded path segments.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn key_url(&self, key: &str) -> Url {
        self.url(&["kv", key])
    }

    fn cas_url(&self) -> Url {
        self.url(&["kv", "cas"])
    }

    #[tracing::instrument(name = "store.get", skip(self))]
    async fn get(&self, key: &str, consistency: Consistency) -> Result<VersionedValue> {
        let response = self
            .client
            .get(self.key_url(key))
            .query(&[("consistency", consistency.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(%key, "Key not found, reading as empty");
            return Ok(VersionedValue::default());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(unexpected_status(key, status, body));
        }

        Ok(response.json::<VersionedValue>().await?)
    }
}

/// Map a CAS response status to an outcome, `None` for transport failures.
fn classify_cas_status(status: StatusCode) -> Option<CasOutcome> {
    if status.is_success() {
        Some(CasOutcome::Swapped { version: 0 })
    } else if status == StatusCode::CONFLICT || status == StatusCode::PRECONDITION_FAILED {
        Some(CasOutcome::Conflict)
    } else {
        None
    }
}

fn unexpected_status(key: &str, status: StatusCode, body: String) -> StorageError {
    StorageError::UnexpectedStatus {
        key: key.to_string(),
        status: status.as_u16(),
        body: body.chars().take(200).collect(),
    }
}

#[async_trait]
impl KeyValueStore for HttpKeyValueStore {
    async fn strong_get(&self, key: &str) -> Result<VersionedValue> {
        self.get(key, Consistency::Strong).await
    }

    async fn eventual_get(&self, key: &str) -> Result<VersionedValue> {
        self.get(key, Consistency::Eventual).await
    }

    #[tracing::instrument(name = "store.cas", skip(self, expected_old, new_value))]
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_old: &str,
        new_value: &str,
    ) -> Result<CasOutcome> {
        let body = CasRequest {
            key,
            old_value: expected_old,
            new_value,
        };

        let response = self.client.post(self.cas_url()).json(&body).send().await?;
        let status = response.status();

        match classify_cas_status(status) {
            Some(CasOutcome::Swapped { .. }) => {
                // Stores that do not report a version still count as swapped.
                let version = response
                    .json::<CasResponse>()
                    .await
                    .map(|r| r.version)
                    .unwrap_or(0);
                Ok(CasOutcome::Swapped { version })
            }
            Some(CasOutcome::Conflict) => Ok(CasOutcome::Conflict),
            None => {
                let body = response.text().await.unwrap_or_default();
                warn!(%key, %status, "CAS returned unexpected status");
                Err(unexpected_status(key, status, body))
            }
        }
    }
}
