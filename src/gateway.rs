//! JSON request gateway.
//!
//! Decodes one request per line and starts the matching saga. Requests look
//! like `{"op": "create_account", "connection_id": "c1", "username": ..., "password": ...}`.

use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::domains::{GameSnapshot, LobbyInfo, Password};
use crate::saga::Notification;
use crate::supervisor::Supervisor;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateAccount {
        connection_id: String,
        username: String,
        password: Password,
    },
    Login {
        connection_id: String,
        username: String,
        password: Password,
    },
    CommitLobbyInfos {
        connection_id: String,
        #[serde(default)]
        lobbies: Vec<LobbyInfo>,
        #[serde(default)]
        removed: Vec<String>,
    },
    CommitLobbyState {
        connection_id: String,
        lobby_id: String,
        snapshot: GameSnapshot,
    },
}

impl Request {
    pub fn connection_id(&self) -> &str {
        match self {
            Request::CreateAccount { connection_id, .. }
            | Request::Login { connection_id, .. }
            | Request::CommitLobbyInfos { connection_id, .. }
            | Request::CommitLobbyState { connection_id, .. } => connection_id,
        }
    }
}

pub fn parse_request(line: &str) -> Result<Request, GatewayError> {
    Ok(serde_json::from_str(line)?)
}

/// Start the saga for a request.
pub fn dispatch(supervisor: &Supervisor, request: Request) -> JoinHandle<Notification> {
    debug!(connection_id = %request.connection_id(), "Dispatching request");
    match request {
        Request::CreateAccount {
            connection_id,
            username,
            password,
        } => supervisor.create_account(connection_id, username, password),
        Request::Login {
            connection_id,
            username,
            password,
        } => supervisor.login(connection_id, username, password),
        Request::CommitLobbyInfos {
            connection_id,
            lobbies,
            removed,
        } => supervisor.commit_lobby_infos(connection_id, lobbies, removed),
        Request::CommitLobbyState {
            connection_id,
            lobby_id,
            snapshot,
        } => supervisor.commit_lobby_state(connection_id, lobby_id, snapshot),
    }
}
