//! The saga workflows.

use tracing::{debug, info};
use uuid::Uuid;

use super::{Notification, SagaContext, Workflow, INVALID_CREDENTIALS};
use crate::aggregate::Aggregate;
use crate::domains::accounts::{validate_new_account, validate_username};
use crate::domains::{
    Accounts, CommitAccount, CommitLobbyInfos, CommitLobbyState, GameSnapshot, Lobbies,
    LobbyInfo, LobbyState, Password, ACCOUNTS_KEY, LOBBIES_KEY,
};
use crate::supervisor::AggregateRegistry;

/// Commit one command and turn its outcome into a saga result.
async fn commit<A: Aggregate>(
    ctx: &SagaContext,
    registry: &AggregateRegistry<A>,
    id: &str,
    command: A::Command,
) -> Result<(), String> {
    let request_id = A::request_id(&command);
    debug!(correlation_id = %ctx.correlation_id, %request_id, kind = registry.kind(), "Committing");

    let committed = ctx.ask(registry.commit(id, command)).await?;
    if committed.success {
        Ok(())
    } else {
        Err(committed.error_message().to_string())
    }
}

/// Validate against the current accounts, commit the account, notify.
pub async fn create_account(
    ctx: SagaContext,
    accounts: &AggregateRegistry<Accounts>,
    username: String,
    password: Password,
) -> Notification {
    info!(correlation_id = %ctx.correlation_id, %username, "Create account saga started");

    let outcome = async {
        // Stateless rules never reach the store.
        validate_username(&username, &password).map_err(|r| r.0)?;

        let book = ctx.ask(accounts.query(ACCOUNTS_KEY)).await?;
        validate_new_account(&book, &username, &password).map_err(|r| r.0)?;

        let command = CommitAccount::new(Uuid::new_v4(), username, password);
        commit(&ctx, accounts, ACCOUNTS_KEY, command).await
    }
    .await;

    ctx.finish(Workflow::CreateAccount, outcome).await
}

/// Verify credentials against the accounts projection.
pub async fn login(
    ctx: SagaContext,
    accounts: &AggregateRegistry<Accounts>,
    username: String,
    mut password: Password,
) -> Notification {
    info!(correlation_id = %ctx.correlation_id, %username, "Login saga started");

    let outcome = async {
        let book = ctx.ask(accounts.query(ACCOUNTS_KEY)).await?;
        let verified = book
            .get(&username)
            .map(|record| record.verify(&mut password).unwrap_or(false))
            .unwrap_or(false);

        if verified {
            Ok(())
        } else {
            Err(INVALID_CREDENTIALS.to_string())
        }
    }
    .await;

    ctx.finish(Workflow::Login, outcome).await
}

/// Commit lobby directory changes, notify.
pub async fn commit_lobby_infos(
    ctx: SagaContext,
    lobbies: &AggregateRegistry<Lobbies>,
    upserts: Vec<LobbyInfo>,
    removed: Vec<String>,
) -> Notification {
    info!(
        correlation_id = %ctx.correlation_id,
        upserts = upserts.len(),
        removed = removed.len(),
        "Lobby directory saga started"
    );

    let command = CommitLobbyInfos {
        request_id: Uuid::new_v4(),
        lobbies: upserts,
        removed,
    };
    let outcome = commit(&ctx, lobbies, LOBBIES_KEY, command).await;

    ctx.finish(Workflow::CommitLobbyInfos, outcome).await
}

/// Commit a lobby's game snapshot, notify.
pub async fn commit_lobby_state(
    ctx: SagaContext,
    lobby_states: &AggregateRegistry<LobbyState>,
    lobby_id: String,
    snapshot: GameSnapshot,
) -> Notification {
    info!(correlation_id = %ctx.correlation_id, %lobby_id, tick = snapshot.tick, "Lobby state saga started");

    let command = CommitLobbyState {
        request_id: Uuid::new_v4(),
        lobby_id: lobby_id.clone(),
        snapshot,
    };
    let outcome = commit(&ctx, lobby_states, &lobby_id, command).await;

    ctx.finish(Workflow::CommitLobbyState, outcome).await
}
