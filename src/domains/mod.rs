//! Concrete aggregates.
//!
//! - `accounts`: user accounts under `"user-accounts"`
//! - `lobbies`: lobby directory under `"lobbies"`
//! - `lobby_state`: per-lobby game snapshots under `"lobby-{id}"`
//! - `password`: move-only secret and hashing

pub mod accounts;
pub mod lobbies;
pub mod lobby_state;
pub mod password;

pub use accounts::{AccountBook, AccountRecord, Accounts, CommitAccount, ACCOUNTS_KEY};
pub use lobbies::{CommitLobbyInfos, Lobbies, LobbyDirectory, LobbyInfo, LOBBIES_KEY};
pub use lobby_state::{lobby_state_key, CommitLobbyState, GameSnapshot, LobbyGame, LobbyState};
pub use password::{Password, PasswordError};
