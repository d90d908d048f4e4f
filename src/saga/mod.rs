//! Sagas: short-lived workflows over aggregate actors.
//!
//! A saga runs as a plain task with a fresh correlation id. It talks to
//! aggregates through their registries, never retries, and ends by forwarding
//! exactly one [`Notification`] to its connection.
//!
//! - `workflows`: create account, login, lobby directory and lobby state commits
//! - `notifier`: delivery of notifications to connections

pub mod notifier;
pub mod workflows;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::supervisor::SupervisorError;

pub use notifier::{ChannelNotifier, Notifier, NotifyError, StdoutNotifier};
pub use workflows::{commit_lobby_infos, commit_lobby_state, create_account, login};

/// Reported when an aggregate reply never arrives.
pub const REQUEST_TIMED_OUT: &str = "Request timed out";
/// Reported for a failed login, whatever the cause.
pub const INVALID_CREDENTIALS: &str = "Invalid username or password";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workflow {
    CreateAccount,
    Login,
    CommitLobbyInfos,
    CommitLobbyState,
}

/// Terminal outcome of a saga as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub correlation_id: Uuid,
    pub workflow: Workflow,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Notification {
    pub fn success(correlation_id: Uuid, workflow: Workflow) -> Self {
        Self {
            correlation_id,
            workflow,
            success: true,
            error: None,
        }
    }

    pub fn failure(correlation_id: Uuid, workflow: Workflow, error: impl Into<String>) -> Self {
        Self {
            correlation_id,
            workflow,
            success: false,
            error: Some(error.into()),
        }
    }

    pub fn from_outcome(correlation_id: Uuid, workflow: Workflow, outcome: Result<(), String>) -> Self {
        match outcome {
            Ok(()) => Self::success(correlation_id, workflow),
            Err(error) => Self::failure(correlation_id, workflow, error),
        }
    }
}

/// Everything a running saga carries.
#[derive(Clone)]
pub struct SagaContext {
    pub correlation_id: Uuid,
    pub connection_id: String,
    pub reply_timeout: Duration,
    notifier: Arc<dyn Notifier>,
}

impl SagaContext {
    pub fn new(
        connection_id: impl Into<String>,
        notifier: Arc<dyn Notifier>,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            connection_id: connection_id.into(),
            reply_timeout,
            notifier,
        }
    }

    /// Await an aggregate reply within the saga's timeout.
    ///
    /// A missing reply (timeout or dropped reply handle) reads as
    /// [`REQUEST_TIMED_OUT`].
    pub async fn ask<T, F>(&self, request: F) -> Result<T, String>
    where
        F: Future<Output = Result<T, SupervisorError>>,
    {
        match tokio::time::timeout(self.reply_timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(SupervisorError::NoReply(key))) => {
                warn!(correlation_id = %self.correlation_id, %key, "Aggregate dropped the request");
                Err(REQUEST_TIMED_OUT.to_string())
            }
            Ok(Err(e)) => {
                warn!(correlation_id = %self.correlation_id, error = %e, "Aggregate unreachable");
                Err(e.to_string())
            }
            Err(_) => {
                warn!(
                    correlation_id = %self.correlation_id,
                    timeout = ?self.reply_timeout,
                    "Aggregate reply timed out"
                );
                Err(REQUEST_TIMED_OUT.to_string())
            }
        }
    }

    /// Forward the terminal outcome and end the saga.
    pub async fn finish(self, workflow: Workflow, outcome: Result<(), String>) -> Notification {
        let notification = Notification::from_outcome(self.correlation_id, workflow, outcome);
        info!(
            correlation_id = %self.correlation_id,
            connection_id = %self.connection_id,
            ?workflow,
            success = notification.success,
            "Saga finished"
        );
        if let Err(e) = self
            .notifier
            .notify(&self.connection_id, &notification)
            .await
        {
            warn!(correlation_id = %self.correlation_id, error = %e, "Failed to deliver notification");
        } else {
            debug!(correlation_id = %self.correlation_id, "Notification delivered");
        }
        notification
    }
}
