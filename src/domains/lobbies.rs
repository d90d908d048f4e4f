//! Lobby directory aggregate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Aggregate, Rejection};

pub const LOBBIES_KEY: &str = "lobbies";

pub const NO_CHANGES: &str = "No lobby changes to commit";
pub const EMPTY_NAME: &str = "Lobby name cannot be empty";
pub const NO_CAPACITY: &str = "Lobby must allow at least one player";
pub const OVER_CAPACITY: &str = "Lobby is over capacity";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyInfo {
    pub id: String,
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub players: Vec<String>,
    pub max_players: u32,
}

impl LobbyInfo {
    fn check(&self) -> Result<(), Rejection> {
        if self.name.trim().is_empty() {
            return Err(Rejection::new(EMPTY_NAME));
        }
        if self.max_players == 0 {
            return Err(Rejection::new(NO_CAPACITY));
        }
        if self.players.len() > self.max_players as usize {
            return Err(Rejection::new(OVER_CAPACITY));
        }
        Ok(())
    }
}

/// Projection: lobby id -> lobby.
pub type LobbyDirectory = BTreeMap<String, LobbyInfo>;

#[derive(Debug, Clone, Deserialize)]
pub struct CommitLobbyInfos {
    pub request_id: Uuid,
    #[serde(default)]
    pub lobbies: Vec<LobbyInfo>,
    #[serde(default)]
    pub removed: Vec<String>,
}

/// Upserts applied before removals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyChanges {
    pub upserts: Vec<LobbyInfo>,
    pub removed: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Lobbies;

impl Aggregate for Lobbies {
    type Projection = LobbyDirectory;
    type Command = CommitLobbyInfos;
    type Mutation = LobbyChanges;

    fn storage_key(&self) -> &str {
        LOBBIES_KEY
    }

    fn request_id(command: &CommitLobbyInfos) -> Uuid {
        command.request_id
    }

    fn prepare(
        &self,
        _projection: &LobbyDirectory,
        command: &mut CommitLobbyInfos,
    ) -> Result<LobbyChanges, Rejection> {
        if command.lobbies.is_empty() && command.removed.is_empty() {
            return Err(Rejection::new(NO_CHANGES));
        }
        for lobby in &command.lobbies {
            lobby.check()?;
        }
        Ok(LobbyChanges {
            upserts: command.lobbies.clone(),
            removed: command.removed.clone(),
        })
    }

    fn apply(projection: &mut LobbyDirectory, mutation: &LobbyChanges) -> Result<(), Rejection> {
        for lobby in &mutation.upserts {
            projection.insert(lobby.id.clone(), lobby.clone());
        }
        for id in &mutation.removed {
            projection.remove(id);
        }
        Ok(())
    }
}
