//! Crash recovery, store outages and restarts of the whole process.

use std::sync::Arc;
use std::time::Duration;

use caskeep::domains::{AccountBook, ACCOUNTS_KEY};
use caskeep::storage::MockKeyValueStore;

use crate::common::TestSystem;

#[tokio::test]
async fn test_kill_then_rehydrate_last_committed_projection() {
    let system = TestSystem::start();
    assert!(system.create_account("alice", "secret1").await.success);
    assert!(system.create_account("bob12", "secret2").await.success);

    system.supervisor.kill(ACCOUNTS_KEY).await.unwrap();

    let book = system.supervisor.accounts().query(ACCOUNTS_KEY).await.unwrap();
    assert_eq!(book.keys().collect::<Vec<_>>(), vec!["alice", "bob12"]);

    // Uniqueness survives the restart.
    let again = system.create_account("alice", "secret9").await;
    assert!(!again.success);
}

#[tokio::test]
async fn test_fresh_process_sees_previous_writes() {
    let store = Arc::new(MockKeyValueStore::new());
    {
        let first = TestSystem::on_store(store.clone());
        assert!(first.create_account("alice", "secret1").await.success);
        first.supervisor.shutdown().await;
    }

    let second = TestSystem::on_store(store);
    assert!(second.login("alice", "secret1").await.success);
    let clash = second.create_account("alice", "secret1").await;
    assert!(!clash.success);
}

#[tokio::test]
async fn test_unreadable_stored_payload_starts_empty() {
    let store = Arc::new(MockKeyValueStore::new());
    store.put(ACCOUNTS_KEY, "{definitely not accounts").await;
    let system = TestSystem::on_store(store.clone());

    let book = system.supervisor.accounts().query(ACCOUNTS_KEY).await.unwrap();
    assert!(book.is_empty());

    // The next commit CASes against the unreadable value and replaces it.
    assert!(system.create_account("alice", "secret1").await.success);
    let stored: AccountBook = serde_json::from_str(&store.value(ACCOUNTS_KEY).await).unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_node_started_during_read_outage_recovers_accounts() {
    let store = Arc::new(MockKeyValueStore::new());
    let first = TestSystem::on_store(store.clone());
    assert!(first.create_account("alice", "secret1").await.success);

    store.set_fail_on_get(true);
    let second = TestSystem::on_store(store.clone());
    let supervisor = second.supervisor.clone();
    let pending = tokio::spawn(async move { supervisor.accounts().query(ACCOUNTS_KEY).await });

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!pending.is_finished());

    store.set_fail_on_get(false);
    let book = pending.await.unwrap().unwrap();
    assert!(book.contains_key("alice"));
    assert!(second.login("alice", "secret1").await.success);
}

#[tokio::test]
async fn test_transient_cas_failures_are_absorbed() {
    let system = TestSystem::start();
    system.supervisor.accounts().query(ACCOUNTS_KEY).await.unwrap();

    system.store.fail_next_cas(2);
    assert!(system.create_account("alice", "secret1").await.success);
}

#[tokio::test]
async fn test_exhausted_retries_reported_as_commit_failed() {
    let system = TestSystem::start();
    system.supervisor.accounts().query(ACCOUNTS_KEY).await.unwrap();

    system.store.fail_next_cas(100);
    let result = system.create_account("alice", "secret1").await;
    assert_eq!(result.error.as_deref(), Some(caskeep::aggregate::COMMIT_FAILED));

    system.store.fail_next_cas(0);
    assert!(system.create_account("alice", "secret1").await.success);
}
