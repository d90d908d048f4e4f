use super::actor::query;
use super::*;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::storage::{KeyValueStore, MockKeyValueStore, ReducePolicy};

const KEY: &str = "tags";

/// Minimal aggregate: a set of unique tags.
struct TagSet;

#[derive(Debug)]
struct AddTag {
    request_id: Uuid,
    tag: String,
}

impl AddTag {
    fn new(tag: &str) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            tag: tag.to_string(),
        }
    }
}

impl Aggregate for TagSet {
    type Projection = BTreeSet<String>;
    type Command = AddTag;
    type Mutation = String;

    fn storage_key(&self) -> &str {
        KEY
    }

    fn request_id(command: &AddTag) -> Uuid {
        command.request_id
    }

    fn prepare(&self, projection: &BTreeSet<String>, command: &mut AddTag) -> Result<String, Rejection> {
        if command.tag.is_empty() {
            return Err(Rejection::new("Tag cannot be empty"));
        }
        if projection.contains(&command.tag) {
            return Err(Rejection::new("Tag already exists"));
        }
        Ok(command.tag.clone())
    }

    fn apply(projection: &mut BTreeSet<String>, mutation: &String) -> Result<(), Rejection> {
        projection.insert(mutation.clone());
        Ok(())
    }
}

fn policy() -> ReducePolicy {
    ReducePolicy {
        max_retries: 3,
        retry_delay: Duration::from_millis(1),
    }
}

type Spawned = (
    mpsc::Sender<AggregateMessage<TagSet>>,
    JoinHandle<ActorExit<TagSet>>,
);

fn spawn_actor(store: Arc<MockKeyValueStore>, seed: Option<BTreeSet<String>>) -> Spawned {
    let (tx, rx) = mpsc::channel(16);
    let store: Arc<dyn KeyValueStore> = store;
    let actor = AggregateActor::new(Arc::new(TagSet), store, policy());
    let handle = tokio::spawn(actor.run(rx, seed, Vec::new()));
    (tx, handle)
}

async fn submit(
    tx: &mpsc::Sender<AggregateMessage<TagSet>>,
    command: AddTag,
) -> oneshot::Receiver<Committed<AddTag>> {
    let (reply, rx) = oneshot::channel();
    tx.send(AggregateMessage::Commit { command, reply })
        .await
        .unwrap();
    rx
}

async fn commit(tx: &mpsc::Sender<AggregateMessage<TagSet>>, command: AddTag) -> Committed<AddTag> {
    submit(tx, command).await.await.unwrap()
}

#[tokio::test]
async fn test_commit_then_query_shows_mutation() {
    let store = Arc::new(MockKeyValueStore::new());
    let (tx, _handle) = spawn_actor(store.clone(), None);

    let command = AddTag::new("rust");
    let request_id = command.request_id;
    let event = commit(&tx, command).await;

    assert!(event.success);
    assert_eq!(event.request_id, request_id);
    assert!(event.error.is_none());

    let projection = query(&tx).await.unwrap();
    assert!(projection.contains("rust"));
    assert_eq!(store.value(KEY).await, r#"["rust"]"#);
}

#[tokio::test]
async fn test_local_rejection_never_touches_store() {
    let store = Arc::new(MockKeyValueStore::new());
    let (tx, _handle) = spawn_actor(store.clone(), Some(BTreeSet::from(["rust".to_string()])));

    let event = commit(&tx, AddTag::new("rust")).await;
    assert!(!event.success);
    assert_eq!(event.error_message(), "Tag already exists");

    let event = commit(&tx, AddTag::new("")).await;
    assert_eq!(event.error_message(), "Tag cannot be empty");

    assert_eq!(store.call_count(), 0);
}

#[tokio::test]
async fn test_back_to_back_commands_both_land() {
    let store = Arc::new(MockKeyValueStore::new());
    let (tx, _handle) = spawn_actor(store.clone(), None);

    let a = AddTag::new("a");
    let b = AddTag::new("b");
    let (id_a, id_b) = (a.request_id, b.request_id);

    let rx_a = submit(&tx, a).await;
    let rx_b = submit(&tx, b).await;

    let event_a = rx_a.await.unwrap();
    let event_b = rx_b.await.unwrap();
    assert_eq!(event_a.request_id, id_a);
    assert_eq!(event_b.request_id, id_b);
    assert!(event_a.success && event_b.success);

    let projection = query(&tx).await.unwrap();
    assert_eq!(projection.len(), 2);
    assert_eq!(store.value(KEY).await, r#"["a","b"]"#);
}

#[tokio::test]
async fn test_racing_writer_is_not_lost() {
    let store = Arc::new(MockKeyValueStore::new());
    let (tx, _handle) = spawn_actor(store.clone(), None);
    query(&tx).await.unwrap();

    store.interfere_before_next_cas(KEY, r#"["other"]"#).await;
    let event = commit(&tx, AddTag::new("mine")).await;

    assert!(event.success);
    assert_eq!(store.value(KEY).await, r#"["mine","other"]"#);
    assert_eq!(store.cas_count(), 2);

    // The refreshed value is adopted, including the other writer's change.
    let projection = query(&tx).await.unwrap();
    assert!(projection.contains("other"));
}

#[tokio::test]
async fn test_hydrates_from_store() {
    let store = Arc::new(MockKeyValueStore::new());
    store.put(KEY, r#"["persisted"]"#).await;
    let (tx, _handle) = spawn_actor(store.clone(), None);

    let projection = query(&tx).await.unwrap();
    assert!(projection.contains("persisted"));
    assert_eq!(store.strong_get_count(), 1);
}

#[tokio::test]
async fn test_unreadable_payload_hydrates_empty() {
    let store = Arc::new(MockKeyValueStore::new());
    store.put(KEY, "not json").await;
    let (tx, _handle) = spawn_actor(store.clone(), None);

    let projection = query(&tx).await.unwrap();
    assert!(projection.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_read_outage_keeps_hydrating_until_store_recovers() {
    let store = Arc::new(MockKeyValueStore::new());
    store.put(KEY, r#"["persisted"]"#).await;
    store.set_fail_on_get(true);
    let (tx, _handle) = spawn_actor(store.clone(), None);

    let reader = tx.clone();
    let pending = tokio::spawn(async move { query(&reader).await });

    // Long enough to exhaust several backoff rounds.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!pending.is_finished());
    assert!(store.strong_get_count() > 9);

    store.set_fail_on_get(false);
    let projection = pending.await.unwrap().unwrap();
    assert!(projection.contains("persisted"));
}

#[tokio::test]
async fn test_seed_skips_store_read() {
    let store = Arc::new(MockKeyValueStore::new());
    store.put(KEY, r#"["persisted"]"#).await;
    let (tx, _handle) = spawn_actor(store.clone(), Some(BTreeSet::from(["seeded".to_string()])));

    let projection = query(&tx).await.unwrap();
    assert!(projection.contains("seeded"));
    assert_eq!(store.strong_get_count(), 0);
}

#[tokio::test]
async fn test_duplicate_pending_request_id_rejected() {
    let store = Arc::new(MockKeyValueStore::new());
    let (tx, _handle) = spawn_actor(store.clone(), None);

    let first = AddTag::new("a");
    let duplicate = AddTag {
        request_id: first.request_id,
        tag: "b".to_string(),
    };

    let rx_first = submit(&tx, first).await;
    let rx_duplicate = submit(&tx, duplicate).await;

    assert!(rx_first.await.unwrap().success);
    let event = rx_duplicate.await.unwrap();
    assert!(!event.success);
    assert_eq!(event.error_message(), DUPLICATE_REQUEST);
}

#[tokio::test]
async fn test_exhausted_retries_report_commit_failed() {
    let store = Arc::new(MockKeyValueStore::new());
    let (tx, _handle) = spawn_actor(store.clone(), None);
    query(&tx).await.unwrap();

    store.fail_next_cas(3);
    let event = commit(&tx, AddTag::new("a")).await;

    assert!(!event.success);
    assert_eq!(event.error_message(), COMMIT_FAILED);
    assert!(query(&tx).await.unwrap().is_empty());

    // Not retried again at the actor level.
    assert_eq!(store.cas_count(), 3);
}

#[tokio::test]
async fn test_dropped_caller_does_not_wedge_actor() {
    let store = Arc::new(MockKeyValueStore::new());
    let (tx, _handle) = spawn_actor(store.clone(), None);

    drop(submit(&tx, AddTag::new("abandoned")).await);
    let event = commit(&tx, AddTag::new("next")).await;

    assert!(event.success);
    let projection = query(&tx).await.unwrap();
    assert!(projection.contains("abandoned"));
    assert!(projection.contains("next"));
}

#[tokio::test]
async fn test_restart_hands_off_projection_and_pending_messages() {
    let store = Arc::new(MockKeyValueStore::new());
    let (tx, handle) = spawn_actor(store.clone(), None);
    assert!(commit(&tx, AddTag::new("kept")).await.success);

    // Both land before the actor runs again, so "late" is left unprocessed.
    let (reply, _late) = oneshot::channel();
    tx.try_send(AggregateMessage::Stop(StopMode::Restart)).unwrap();
    tx.try_send(AggregateMessage::Commit {
        command: AddTag::new("late"),
        reply,
    })
    .unwrap();

    match handle.await.unwrap() {
        ActorExit::Handoff {
            projection,
            pending,
        } => {
            assert!(projection.unwrap().contains("kept"));
            assert_eq!(pending.len(), 1);
            assert!(matches!(&pending[0], AggregateMessage::Commit { command, .. } if command.tag == "late"));
        }
        ActorExit::Stopped => panic!("expected handoff"),
    }
}

#[tokio::test]
async fn test_shutdown_stops_actor() {
    let store = Arc::new(MockKeyValueStore::new());
    let (tx, handle) = spawn_actor(store, None);

    tx.send(AggregateMessage::Stop(StopMode::Shutdown)).await.unwrap();
    assert!(matches!(handle.await.unwrap(), ActorExit::Stopped));
}

#[test]
fn test_deserialize_projection_treats_garbage_as_empty() {
    let empty: BTreeSet<String> = deserialize_projection(KEY, "");
    assert!(empty.is_empty());
    let garbage: BTreeSet<String> = deserialize_projection(KEY, "{oops");
    assert!(garbage.is_empty());
    let parsed: BTreeSet<String> = deserialize_projection(KEY, r#"["x"]"#);
    assert_eq!(parsed.len(), 1);
}

#[test]
fn test_reducer_is_idempotent() {
    let reducer = reducer_for::<TagSet>(KEY.to_string(), "x".to_string());
    let once = reducer(r#"["a"]"#).unwrap();
    let twice = reducer(&once).unwrap();
    assert_eq!(once, twice);
    assert_eq!(once, r#"["a","x"]"#);
}
