//! Supervisor: owns every aggregate actor and spawns sagas.
//!
//! Keeps one live actor per storage key, restarts crashed actors (which then
//! re-hydrate from the store), performs planned restarts with state handoff,
//! and routes commands to whichever actor is currently live.

pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::aggregate::Aggregate;
use crate::config::Config;
use crate::domains::{
    Accounts, GameSnapshot, Lobbies, LobbyInfo, LobbyState, Password, ACCOUNTS_KEY, LOBBIES_KEY,
};
use crate::saga::{self, Notification, Notifier, SagaContext};
use crate::storage::KeyValueStore;

pub use registry::{AggregateFactory, AggregateRegistry};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupervisorError {
    #[error("Aggregate {0} is unavailable")]
    Unavailable(String),

    #[error("Aggregate {0} dropped the request")]
    NoReply(String),

    #[error("No running aggregate for {0}")]
    UnknownAggregate(String),
}

/// Which registry a storage key belongs to.
enum Target<'a> {
    Accounts,
    Lobbies,
    LobbyState(&'a str),
}

fn resolve(key: &str) -> Result<Target<'_>, SupervisorError> {
    match key {
        ACCOUNTS_KEY => Ok(Target::Accounts),
        LOBBIES_KEY => Ok(Target::Lobbies),
        _ => match key.strip_prefix("lobby-") {
            Some(lobby_id) if !lobby_id.is_empty() => Ok(Target::LobbyState(lobby_id)),
            _ => Err(SupervisorError::UnknownAggregate(key.to_string())),
        },
    }
}

fn registry<A: Aggregate>(
    kind: &'static str,
    factory: AggregateFactory<A>,
    store: &Arc<dyn KeyValueStore>,
    config: &Config,
) -> AggregateRegistry<A> {
    AggregateRegistry::new(
        kind,
        factory,
        Arc::clone(store),
        config.commit.clone(),
        config.actor.clone(),
    )
}

struct Inner {
    accounts: AggregateRegistry<Accounts>,
    lobbies: AggregateRegistry<Lobbies>,
    lobby_states: AggregateRegistry<LobbyState>,
    notifier: Arc<dyn Notifier>,
    reply_timeout: Duration,
}

/// Cheap-to-clone handle to the actor tree.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &Config, notifier: Arc<dyn Notifier>) -> Self {
        let inner = Inner {
            accounts: registry::<Accounts>("accounts", Arc::new(|_: &str| Accounts), &store, config),
            lobbies: registry::<Lobbies>("lobbies", Arc::new(|_: &str| Lobbies), &store, config),
            lobby_states: registry::<LobbyState>(
                "lobby_state",
                Arc::new(|id: &str| LobbyState::new(id)),
                &store,
                config,
            ),
            notifier,
            reply_timeout: config.saga.reply_timeout,
        };
        info!("Supervisor started");

        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn accounts(&self) -> &AggregateRegistry<Accounts> {
        &self.inner.accounts
    }

    pub fn lobbies(&self) -> &AggregateRegistry<Lobbies> {
        &self.inner.lobbies
    }

    pub fn lobby_states(&self) -> &AggregateRegistry<LobbyState> {
        &self.inner.lobby_states
    }

    fn context(&self, connection_id: String) -> SagaContext {
        SagaContext::new(
            connection_id,
            Arc::clone(&self.inner.notifier),
            self.inner.reply_timeout,
        )
    }

    pub fn create_account(
        &self,
        connection_id: String,
        username: String,
        password: Password,
    ) -> JoinHandle<Notification> {
        let ctx = self.context(connection_id);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { saga::create_account(ctx, &inner.accounts, username, password).await })
    }

    pub fn login(
        &self,
        connection_id: String,
        username: String,
        password: Password,
    ) -> JoinHandle<Notification> {
        let ctx = self.context(connection_id);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { saga::login(ctx, &inner.accounts, username, password).await })
    }

    pub fn commit_lobby_infos(
        &self,
        connection_id: String,
        lobbies: Vec<LobbyInfo>,
        removed: Vec<String>,
    ) -> JoinHandle<Notification> {
        let ctx = self.context(connection_id);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(
            async move { saga::commit_lobby_infos(ctx, &inner.lobbies, lobbies, removed).await },
        )
    }

    pub fn commit_lobby_state(
        &self,
        connection_id: String,
        lobby_id: String,
        snapshot: GameSnapshot,
    ) -> JoinHandle<Notification> {
        let ctx = self.context(connection_id);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            saga::commit_lobby_state(ctx, &inner.lobby_states, lobby_id, snapshot).await
        })
    }

    /// Planned restart of the actor behind a storage key.
    pub async fn restart(&self, key: &str) -> Result<(), SupervisorError> {
        match resolve(key)? {
            Target::Accounts => self.inner.accounts.restart(ACCOUNTS_KEY).await,
            Target::Lobbies => self.inner.lobbies.restart(LOBBIES_KEY).await,
            Target::LobbyState(id) => self.inner.lobby_states.restart(id).await,
        }
    }

    /// Abort the actor behind a storage key as if it had crashed.
    pub async fn kill(&self, key: &str) -> Result<(), SupervisorError> {
        match resolve(key)? {
            Target::Accounts => self.inner.accounts.kill(ACCOUNTS_KEY).await,
            Target::Lobbies => self.inner.lobbies.kill(LOBBIES_KEY).await,
            Target::LobbyState(id) => self.inner.lobby_states.kill(id).await,
        }
    }

    /// Stop every actor.
    pub async fn shutdown(&self) {
        info!("Supervisor shutting down");
        self.inner.accounts.stop_all().await;
        self.inner.lobbies.stop_all().await;
        self.inner.lobby_states.stop_all().await;
    }
}
