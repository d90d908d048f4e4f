//! Lobby directory and lobby state workflows.

use caskeep::domains::lobbies::OVER_CAPACITY;
use caskeep::domains::lobby_state::{LOBBY_MISMATCH, STALE_STATE};
use caskeep::domains::{GameSnapshot, LobbyDirectory, LOBBIES_KEY};
use caskeep::saga::Workflow;

use crate::common::TestSystem;

#[tokio::test]
async fn test_lobby_directory_upsert_and_remove() {
    let system = TestSystem::start();

    let created = system
        .request(
            r#"{"op":"commit_lobby_infos","connection_id":"c","lobbies":[
                {"id":"a","name":"Alpha","host":"alice","players":["alice"],"max_players":4},
                {"id":"b","name":"Beta","host":"bob","max_players":2}]}"#,
        )
        .await;
    assert!(created.success);
    assert_eq!(created.workflow, Workflow::CommitLobbyInfos);

    let removed = system
        .request(r#"{"op":"commit_lobby_infos","connection_id":"c","removed":["a"]}"#)
        .await;
    assert!(removed.success);

    let stored: LobbyDirectory =
        serde_json::from_str(&system.store.value(LOBBIES_KEY).await).unwrap();
    assert_eq!(stored.keys().collect::<Vec<_>>(), vec!["b"]);
}

#[tokio::test]
async fn test_over_capacity_lobby_rejected() {
    let system = TestSystem::start();

    let result = system
        .request(
            r#"{"op":"commit_lobby_infos","connection_id":"c","lobbies":[
                {"id":"a","name":"Alpha","host":"alice","players":["x","y","z"],"max_players":2}]}"#,
        )
        .await;

    assert_eq!(result.error.as_deref(), Some(OVER_CAPACITY));
    assert_eq!(system.store.cas_count(), 0);
}

#[tokio::test]
async fn test_lobby_state_snapshots_advance() {
    let system = TestSystem::start();

    for tick in [1, 2, 5] {
        let line = format!(
            r#"{{"op":"commit_lobby_state","connection_id":"c","lobby_id":"7","snapshot":{{"tick":{tick},"state":{{"players":2}}}}}}"#
        );
        assert!(system.request(&line).await.success);
    }

    let stale = system
        .request(r#"{"op":"commit_lobby_state","connection_id":"c","lobby_id":"7","snapshot":{"tick":3}}"#)
        .await;
    assert_eq!(stale.error.as_deref(), Some(STALE_STATE));

    let stored: GameSnapshot =
        serde_json::from_str(&system.store.value("lobby-7").await).unwrap();
    assert_eq!(stored.tick, 5);

    // Other lobbies are independent keys.
    assert!(system
        .request(r#"{"op":"commit_lobby_state","connection_id":"c","lobby_id":"8","snapshot":{"tick":1}}"#)
        .await
        .success);
    assert!(system.supervisor.lobby_states().is_running("8").await);
}

#[tokio::test]
async fn test_lobby_state_routed_to_its_own_actor() {
    let system = TestSystem::start();
    let command = caskeep::domains::CommitLobbyState {
        request_id: uuid::Uuid::new_v4(),
        lobby_id: "other".to_string(),
        snapshot: GameSnapshot {
            tick: 1,
            state: serde_json::Value::Null,
        },
    };

    // Sent to lobby 7's actor but naming another lobby.
    let committed = system
        .supervisor
        .lobby_states()
        .commit("7", command)
        .await
        .unwrap();
    assert_eq!(committed.error_message(), LOBBY_MISMATCH);
}
