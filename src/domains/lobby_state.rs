//! Per-lobby game state aggregate, one storage key per lobby.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Aggregate, Rejection};

pub const LOBBY_MISMATCH: &str = "Lobby id does not match";
pub const STALE_STATE: &str = "Lobby state is stale";

/// Storage key of a lobby's game state.
pub fn lobby_state_key(lobby_id: &str) -> String {
    format!("lobby-{lobby_id}")
}

/// Latest game state of a lobby, ordered by `tick`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub tick: u64,
    #[serde(default)]
    pub state: serde_json::Value,
}

/// Projection: the last committed snapshot, if any.
pub type LobbyGame = Option<GameSnapshot>;

#[derive(Debug, Clone, Deserialize)]
pub struct CommitLobbyState {
    pub request_id: Uuid,
    pub lobby_id: String,
    pub snapshot: GameSnapshot,
}

#[derive(Debug)]
pub struct LobbyState {
    lobby_id: String,
    key: String,
}

impl LobbyState {
    pub fn new(lobby_id: impl Into<String>) -> Self {
        let lobby_id = lobby_id.into();
        let key = lobby_state_key(&lobby_id);
        Self { lobby_id, key }
    }

    pub fn lobby_id(&self) -> &str {
        &self.lobby_id
    }
}

/// Accept `next` over `current` only if it is newer. The identical snapshot
/// counts as already applied.
fn advance(current: &LobbyGame, next: &GameSnapshot) -> Result<bool, Rejection> {
    match current {
        Some(current) if current == next => Ok(false),
        Some(current) if current.tick >= next.tick => Err(Rejection::new(STALE_STATE)),
        _ => Ok(true),
    }
}

impl Aggregate for LobbyState {
    type Projection = LobbyGame;
    type Command = CommitLobbyState;
    type Mutation = GameSnapshot;

    fn storage_key(&self) -> &str {
        &self.key
    }

    fn request_id(command: &CommitLobbyState) -> Uuid {
        command.request_id
    }

    fn prepare(
        &self,
        projection: &LobbyGame,
        command: &mut CommitLobbyState,
    ) -> Result<GameSnapshot, Rejection> {
        if command.lobby_id != self.lobby_id {
            return Err(Rejection::new(LOBBY_MISMATCH));
        }
        advance(projection, &command.snapshot)?;
        Ok(command.snapshot.clone())
    }

    fn apply(projection: &mut LobbyGame, mutation: &GameSnapshot) -> Result<(), Rejection> {
        if advance(projection, mutation)? {
            *projection = Some(mutation.clone());
        }
        Ok(())
    }
}
