//! Pending commit ledger.
//!
//! Tracks accepted commands awaiting their commit outcome. Owned by a single
//! actor task, so insertion and removal need no locking.

use std::collections::HashMap;

use tokio::sync::oneshot;
use uuid::Uuid;

use super::Committed;

/// Reply handle of the caller waiting on a commit.
pub type ReplyTo<C> = oneshot::Sender<Committed<C>>;

/// `request_id -> caller` for every in-flight command.
pub struct PendingCommitLedger<C> {
    entries: HashMap<Uuid, ReplyTo<C>>,
}

impl<C> Default for PendingCommitLedger<C> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<C> PendingCommitLedger<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a caller. Hands the reply handle back if the id is already pending.
    pub fn insert(&mut self, request_id: Uuid, reply: ReplyTo<C>) -> Result<(), ReplyTo<C>> {
        if self.entries.contains_key(&request_id) {
            return Err(reply);
        }
        self.entries.insert(request_id, reply);
        Ok(())
    }

    pub fn contains(&self, request_id: Uuid) -> bool {
        self.entries.contains_key(&request_id)
    }

    /// Remove and return the caller for `request_id`. Each entry resolves once.
    pub fn remove(&mut self, request_id: Uuid) -> Option<ReplyTo<C>> {
        self.entries.remove(&request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
