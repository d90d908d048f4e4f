//! Per-kind registry of supervised aggregate actors.
//!
//! Each key gets a monitor task that owns the spawn loop. The monitor publishes
//! the live actor's mailbox through a `watch` channel; routing re-reads it
//! whenever a send hits a closed mailbox.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, info, warn};

use super::SupervisorError;
use crate::aggregate::{
    ActorExit, Aggregate, AggregateActor, AggregateMessage, Committed, StopMode,
};
use crate::config::ActorConfig;
use crate::storage::{KeyValueStore, ReducePolicy};

/// Builds the aggregate for an id.
pub type AggregateFactory<A> = Arc<dyn Fn(&str) -> A + Send + Sync>;

/// The live actor of a key.
struct ActorHandle<A: Aggregate> {
    mailbox: mpsc::Sender<AggregateMessage<A>>,
    abort: AbortHandle,
}

impl<A: Aggregate> Clone for ActorHandle<A> {
    fn clone(&self) -> Self {
        Self {
            mailbox: self.mailbox.clone(),
            abort: self.abort.clone(),
        }
    }
}

type Current<A> = watch::Receiver<Option<ActorHandle<A>>>;

struct Child<A: Aggregate> {
    current: Current<A>,
    monitor: JoinHandle<()>,
}

/// One supervised actor per id for a single aggregate kind.
///
/// The registry holds no aggregate state and never touches the store itself.
pub struct AggregateRegistry<A: Aggregate> {
    kind: &'static str,
    factory: AggregateFactory<A>,
    store: Arc<dyn KeyValueStore>,
    policy: ReducePolicy,
    settings: ActorConfig,
    children: Mutex<HashMap<String, Child<A>>>,
}

impl<A: Aggregate> AggregateRegistry<A> {
    pub fn new(
        kind: &'static str,
        factory: AggregateFactory<A>,
        store: Arc<dyn KeyValueStore>,
        policy: ReducePolicy,
        settings: ActorConfig,
    ) -> Self {
        Self {
            kind,
            factory,
            store,
            policy,
            settings,
            children: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Current actor of `id`, spawning a monitor if none is running.
    async fn child(&self, id: &str) -> Current<A> {
        let mut children = self.children.lock().await;
        if let Some(child) = children.get(id) {
            if !child.monitor.is_finished() {
                return child.current.clone();
            }
        }

        let aggregate = Arc::new((self.factory)(id));
        info!(kind = self.kind, key = aggregate.storage_key(), "Starting supervised aggregate");

        let (publish, current) = watch::channel(None);
        let monitor = tokio::spawn(supervise(
            aggregate,
            Arc::clone(&self.store),
            self.policy.clone(),
            self.settings.clone(),
            publish,
        ));
        children.insert(
            id.to_string(),
            Child {
                current: current.clone(),
                monitor,
            },
        );
        current
    }

    /// Current actor of `id` without spawning one.
    async fn running(&self, id: &str) -> Result<Current<A>, SupervisorError> {
        let children = self.children.lock().await;
        match children.get(id) {
            Some(child) if !child.monitor.is_finished() => Ok(child.current.clone()),
            _ => Err(SupervisorError::UnknownAggregate(id.to_string())),
        }
    }

    /// Deliver a message to the live actor of `id`.
    ///
    /// A send that hits a closed mailbox waits for the monitor to publish the
    /// successor and is retried there.
    pub async fn send(&self, id: &str, message: AggregateMessage<A>) -> Result<(), SupervisorError> {
        let current = self.child(id).await;
        route(id, current, message).await
    }

    /// Submit a command and wait for its outcome.
    pub async fn commit(
        &self,
        id: &str,
        command: A::Command,
    ) -> Result<Committed<A::Command>, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(id, AggregateMessage::Commit { command, reply })
            .await?;
        rx.await
            .map_err(|_| SupervisorError::NoReply(id.to_string()))
    }

    /// Read the projection of `id`.
    pub async fn query(&self, id: &str) -> Result<A::Projection, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(id, AggregateMessage::Query { reply }).await?;
        rx.await
            .map_err(|_| SupervisorError::NoReply(id.to_string()))
    }

    /// Planned restart. Returns once the successor is live.
    pub async fn restart(&self, id: &str) -> Result<(), SupervisorError> {
        let mut current = self.running(id).await?;
        current.borrow_and_update();
        route(id, current.clone(), AggregateMessage::Stop(StopMode::Restart)).await?;
        await_successor(id, &mut current).await
    }

    /// Abort the actor of `id` as if it had crashed. Returns once the monitor
    /// has reacted.
    pub async fn kill(&self, id: &str) -> Result<(), SupervisorError> {
        let mut current = self.running(id).await?;
        let handle = current.borrow_and_update().clone();
        let Some(handle) = handle else {
            return Err(SupervisorError::Unavailable(id.to_string()));
        };

        warn!(kind = self.kind, %id, "Killing aggregate actor");
        handle.abort.abort();
        await_successor(id, &mut current).await
    }

    /// Stop the actor of `id` for good.
    pub async fn stop(&self, id: &str) {
        let child = self.children.lock().await.remove(id);
        if let Some(child) = child {
            shutdown_child(id, child).await;
        }
    }

    /// Stop every actor of this kind.
    pub async fn stop_all(&self) {
        let children: Vec<_> = self.children.lock().await.drain().collect();
        for (id, child) in children {
            shutdown_child(&id, child).await;
        }
    }

    pub async fn is_running(&self, id: &str) -> bool {
        self.running(id).await.is_ok()
    }
}

async fn route<A: Aggregate>(
    id: &str,
    mut current: Current<A>,
    mut message: AggregateMessage<A>,
) -> Result<(), SupervisorError> {
    loop {
        let handle = current.borrow_and_update().clone();
        if let Some(handle) = handle {
            match handle.mailbox.send(message).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => message = returned,
            }
        }
        if current.changed().await.is_err() {
            return Err(SupervisorError::Unavailable(id.to_string()));
        }
    }
}

async fn await_successor<A: Aggregate>(
    id: &str,
    current: &mut Current<A>,
) -> Result<(), SupervisorError> {
    current
        .changed()
        .await
        .map_err(|_| SupervisorError::Unavailable(id.to_string()))
}

async fn shutdown_child<A: Aggregate>(id: &str, child: Child<A>) {
    let Child { current, monitor } = child;
    // Unpublished or already gone: nothing to stop gracefully.
    if route(id, current, AggregateMessage::Stop(StopMode::Shutdown))
        .await
        .is_err()
    {
        monitor.abort();
    }
    let _ = monitor.await;
}

/// Spawn loop for one key.
async fn supervise<A: Aggregate>(
    aggregate: Arc<A>,
    store: Arc<dyn KeyValueStore>,
    policy: ReducePolicy,
    settings: ActorConfig,
    publish: watch::Sender<Option<ActorHandle<A>>>,
) {
    let key = aggregate.storage_key().to_string();
    let mut seed = None;
    let mut replay = Vec::new();
    let mut crashes = 0u32;

    loop {
        let (mailbox, inbox) = mpsc::channel(settings.mailbox_capacity);
        let actor = AggregateActor::new(Arc::clone(&aggregate), Arc::clone(&store), policy.clone());
        let task = tokio::spawn(actor.run(inbox, seed.take(), std::mem::take(&mut replay)));

        publish.send_replace(Some(ActorHandle {
            mailbox,
            abort: task.abort_handle(),
        }));

        match task.await {
            Ok(ActorExit::Stopped) => {
                info!(%key, "Supervised aggregate stopped");
                break;
            }
            Ok(ActorExit::Handoff {
                projection,
                pending,
            }) => {
                info!(%key, replayed = pending.len(), "Restarting aggregate with handed-off state");
                seed = projection;
                replay = pending;
                crashes = 0;
            }
            Err(e) => {
                crashes += 1;
                if crashes > settings.max_restarts {
                    error!(%key, crashes, error = %e, "Aggregate keeps crashing, giving up");
                    break;
                }
                warn!(
                    %key,
                    attempt = crashes,
                    panicked = e.is_panic(),
                    error = %e,
                    "Aggregate actor crashed, restarting"
                );
                tokio::time::sleep(settings.restart_delay).await;
            }
        }
    }
}
