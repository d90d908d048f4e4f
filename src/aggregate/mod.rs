//! Single-writer aggregate actors.
//!
//! An aggregate is the unit of consistency behind one storage key. Its actor
//! owns the in-memory projection, serializes every command through one
//! mailbox, and commits through the store's compare-and-swap:
//!
//! validate → record caller → reduce-until-success → apply → reply
//!
//! - `actor`: the mailbox loop, hydration and commit pipeline
//! - `ledger`: pending commit ledger (request id → caller)

pub mod actor;
pub mod ledger;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::warn;
use uuid::Uuid;

pub use crate::storage::reduce::Rejection;
pub use actor::{ActorExit, AggregateActor};
pub use ledger::{PendingCommitLedger, ReplyTo};

/// Error carried by a commit that failed at the store level.
pub const COMMIT_FAILED: &str = "Commit failed";
/// Error carried by a command whose request id is already pending.
pub const DUPLICATE_REQUEST: &str = "Duplicate request id";

/// Domain behaviour plugged into an [`AggregateActor`].
///
/// `prepare` runs once per command against the actor's projection and turns
/// the command into a self-contained mutation (hashes, timestamps and other
/// non-deterministic parts are resolved here). `apply` may then run many
/// times against different base projections and must be idempotent: applying
/// a mutation that is already present is a no-op, not an error.
pub trait Aggregate: Send + Sync + 'static {
    type Projection: Default + Clone + Serialize + DeserializeOwned + fmt::Debug + Send + Sync;
    type Command: fmt::Debug + Send + 'static;
    type Mutation: Clone + fmt::Debug + Send + Sync + 'static;

    /// Key of the aggregate in the remote store.
    fn storage_key(&self) -> &str;

    /// Caller-assigned correlation id of a command.
    fn request_id(command: &Self::Command) -> Uuid;

    /// Local validation against the current projection.
    ///
    /// Pure with respect to the store: never performs I/O.
    fn prepare(
        &self,
        projection: &Self::Projection,
        command: &mut Self::Command,
    ) -> Result<Self::Mutation, Rejection>;

    /// Apply a prepared mutation to a projection.
    fn apply(projection: &mut Self::Projection, mutation: &Self::Mutation)
        -> Result<(), Rejection>;
}

/// Terminal outcome of a command, delivered once to its caller.
#[derive(Debug)]
pub struct Committed<C> {
    pub request_id: Uuid,
    pub command: C,
    pub success: bool,
    pub error: Option<String>,
}

impl<C> Committed<C> {
    pub fn succeeded(request_id: Uuid, command: C) -> Self {
        Self {
            request_id,
            command,
            success: true,
            error: None,
        }
    }

    pub fn failed(request_id: Uuid, command: C, error: impl Into<String>) -> Self {
        Self {
            request_id,
            command,
            success: false,
            error: Some(error.into()),
        }
    }

    /// Error message, empty on success.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("")
    }
}

/// How an actor should end when asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// End for good; queued callers receive no reply.
    Shutdown,
    /// End and hand the projection and queued messages to a successor.
    Restart,
}

/// Messages accepted by an aggregate actor's mailbox.
pub enum AggregateMessage<A: Aggregate> {
    /// Set the projection. Later deliveries overwrite earlier ones.
    Initialize(A::Projection),
    Commit {
        command: A::Command,
        reply: ReplyTo<A::Command>,
    },
    Query {
        reply: oneshot::Sender<A::Projection>,
    },
    Stop(StopMode),
}

impl<A: Aggregate> fmt::Debug for AggregateMessage<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateMessage::Initialize(_) => f.write_str("Initialize"),
            AggregateMessage::Commit { command, .. } => {
                f.debug_struct("Commit").field("command", command).finish()
            }
            AggregateMessage::Query { .. } => f.write_str("Query"),
            AggregateMessage::Stop(mode) => f.debug_tuple("Stop").field(mode).finish(),
        }
    }
}

/// Serialize a projection to its stored form.
pub fn serialize_projection<P: Serialize>(projection: &P) -> Result<String, Rejection> {
    serde_json::to_string(projection)
        .map_err(|e| Rejection::new(format!("Failed to serialize projection: {e}")))
}

/// Deserialize a stored projection.
///
/// An absent value is the empty projection. A payload that no longer parses
/// is also read as empty rather than treated as fatal.
pub fn deserialize_projection<P: DeserializeOwned + Default>(key: &str, raw: &str) -> P {
    if raw.is_empty() {
        return P::default();
    }
    match serde_json::from_str(raw) {
        Ok(projection) => projection,
        Err(e) => {
            warn!(%key, error = %e, "Stored projection unreadable, starting empty");
            P::default()
        }
    }
}

/// Build the reducer handed to the store for one prepared mutation.
pub fn reducer_for<A: Aggregate>(
    key: String,
    mutation: A::Mutation,
) -> impl Fn(&str) -> Result<String, Rejection> + Send + Sync {
    move |old: &str| {
        let mut projection: A::Projection = deserialize_projection(&key, old);
        A::apply(&mut projection, &mutation)?;
        serialize_projection(&projection)
    }
}

#[cfg(test)]
mod tests;
