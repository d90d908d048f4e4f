//! Aggregate actor task.
//!
//! One task per aggregate key reads a bounded mailbox. Store I/O runs in
//! spawned tasks that report back through an internal continuation channel,
//! so the actor keeps accepting messages while a commit is in flight.
//!
//! ```text
//! Hydrating ──Initialize/Hydrated──► Ready
//!
//! Commit: Accepted ─► Committing ─► Committed | Failed
//! ```
//!
//! Exactly one commit is in flight at a time. Later commands queue in arrival
//! order and are validated when they reach the front, so outcomes are
//! delivered in mailbox order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    deserialize_projection, reducer_for, serialize_projection, Aggregate, AggregateMessage,
    Committed, PendingCommitLedger, ReplyTo, StopMode, COMMIT_FAILED, DUPLICATE_REQUEST,
};
use crate::storage::{
    idempotent_reduce_until_success, KeyValueStore, ReduceError, ReduceOutcome, ReducePolicy,
};
use crate::utils::retry::hydration_backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Hydrating,
    Ready,
}

/// Continuations delivered back to the actor by its own spawned tasks.
enum Internal<A: Aggregate> {
    Hydrated {
        epoch: u64,
        projection: A::Projection,
        raw: Option<String>,
    },
    Finished {
        request_id: Uuid,
        command: A::Command,
        mutation: A::Mutation,
        result: Result<ReduceOutcome, ReduceError>,
    },
}

/// How an actor task ended.
pub enum ActorExit<A: Aggregate> {
    /// Stopped for good.
    Stopped,
    /// Planned restart: state for the successor.
    Handoff {
        /// `None` if the actor had not finished hydrating.
        projection: Option<A::Projection>,
        /// Messages received but not yet processed, in order.
        pending: Vec<AggregateMessage<A>>,
    },
}

/// Single-writer owner of one aggregate's projection.
pub struct AggregateActor<A: Aggregate> {
    aggregate: Arc<A>,
    key: String,
    store: Arc<dyn KeyValueStore>,
    policy: ReducePolicy,
    projection: A::Projection,
    /// Last raw value known to be in the store, used as the CAS expectation.
    observed: Option<String>,
    phase: Phase,
    hydration_epoch: u64,
    ledger: PendingCommitLedger<A::Command>,
    in_flight: Option<Uuid>,
    backlog: VecDeque<AggregateMessage<A>>,
    stopping: Option<StopMode>,
    internal_tx: mpsc::UnboundedSender<Internal<A>>,
    internal_rx: Option<mpsc::UnboundedReceiver<Internal<A>>>,
}

impl<A: Aggregate> AggregateActor<A> {
    pub fn new(aggregate: Arc<A>, store: Arc<dyn KeyValueStore>, policy: ReducePolicy) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let key = aggregate.storage_key().to_string();
        Self {
            aggregate,
            key,
            store,
            policy,
            projection: A::Projection::default(),
            observed: None,
            phase: Phase::Hydrating,
            hydration_epoch: 0,
            ledger: PendingCommitLedger::new(),
            in_flight: None,
            backlog: VecDeque::new(),
            stopping: None,
            internal_tx,
            internal_rx: Some(internal_rx),
        }
    }

    /// Run until stopped.
    ///
    /// With a `seed` the projection is taken as-is and the store is not read;
    /// otherwise it is hydrated from the store. `replay` holds messages handed
    /// over by a predecessor and is processed before the mailbox.
    pub async fn run(
        mut self,
        mut mailbox: mpsc::Receiver<AggregateMessage<A>>,
        seed: Option<A::Projection>,
        replay: Vec<AggregateMessage<A>>,
    ) -> ActorExit<A> {
        let Some(mut internal_rx) = self.internal_rx.take() else {
            return ActorExit::Stopped;
        };

        info!(key = %self.key, seeded = seed.is_some(), "Aggregate actor started");

        match seed {
            Some(projection) => self.initialize(projection, None),
            None => self.start_hydration(),
        }
        for message in replay {
            self.handle(message);
        }

        let mode = loop {
            if let Some(mode) = self.stopping {
                if self.in_flight.is_none() {
                    break mode;
                }
            }

            tokio::select! {
                biased;
                Some(event) = internal_rx.recv() => self.handle_internal(event),
                message = mailbox.recv(), if self.stopping.is_none() => match message {
                    Some(message) => self.handle(message),
                    None => {
                        debug!(key = %self.key, "Mailbox closed");
                        self.stopping = Some(StopMode::Shutdown);
                    }
                },
                else => break self.stopping.unwrap_or(StopMode::Shutdown),
            }
        };

        self.finish(mode, mailbox)
    }

    fn handle(&mut self, message: AggregateMessage<A>) {
        match message {
            AggregateMessage::Initialize(projection) => self.initialize(projection, None),
            AggregateMessage::Stop(mode) => {
                info!(key = %self.key, ?mode, "Aggregate actor stopping");
                self.stopping = Some(mode);
            }
            AggregateMessage::Query { reply } if self.phase == Phase::Ready => {
                let _ = reply.send(self.projection.clone());
            }
            AggregateMessage::Commit { command, reply } if self.is_pending(A::request_id(&command)) => {
                let request_id = A::request_id(&command);
                warn!(key = %self.key, %request_id, "Request id already pending");
                let _ = reply.send(Committed::failed(request_id, command, DUPLICATE_REQUEST));
            }
            queued => {
                self.backlog.push_back(queued);
                self.pump();
            }
        }
    }

    fn is_pending(&self, request_id: Uuid) -> bool {
        self.ledger.contains(request_id)
            || self.backlog.iter().any(|queued| {
                matches!(queued, AggregateMessage::Commit { command, .. } if A::request_id(command) == request_id)
            })
    }

    /// Start queued work while the actor is ready and idle.
    fn pump(&mut self) {
        while self.phase == Phase::Ready && self.in_flight.is_none() && self.stopping.is_none() {
            let Some(message) = self.backlog.pop_front() else {
                break;
            };
            match message {
                AggregateMessage::Commit { command, reply } => self.begin_commit(command, reply),
                AggregateMessage::Query { reply } => {
                    let _ = reply.send(self.projection.clone());
                }
                other => self.handle(other),
            }
        }
    }

    fn initialize(&mut self, projection: A::Projection, observed: Option<String>) {
        // Supersedes any hydration still running.
        self.hydration_epoch += 1;
        self.projection = projection;
        self.observed = observed;
        self.phase = Phase::Ready;
        debug!(key = %self.key, "Projection initialized");
        self.pump();
    }

    fn start_hydration(&mut self) {
        self.phase = Phase::Hydrating;
        self.hydration_epoch += 1;
        let epoch = self.hydration_epoch;

        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        let internal = self.internal_tx.clone();

        tokio::spawn(async move {
            let store = &store;
            let key = &key;
            let read = || async move { store.strong_get(key).await };

            // A read error is not an empty store: stay Hydrating until a read lands.
            let value = loop {
                match read
                    .retry(hydration_backoff())
                    .notify(|err, delay: Duration| {
                        warn!(%key, error = %err, ?delay, "Hydration read failed, retrying");
                    })
                    .await
                {
                    Ok(value) => break value,
                    Err(e) if internal.is_closed() => {
                        debug!(%key, error = %e, "Actor gone, abandoning hydration");
                        return;
                    }
                    Err(e) => {
                        error!(%key, error = %e, "Hydration backoff exhausted, starting over");
                    }
                }
            };

            let _ = internal.send(Internal::Hydrated {
                epoch,
                projection: deserialize_projection(key, &value.value),
                raw: Some(value.value),
            });
        });
    }

    fn begin_commit(&mut self, mut command: A::Command, reply: ReplyTo<A::Command>) {
        let request_id = A::request_id(&command);

        let mutation = match self.aggregate.prepare(&self.projection, &mut command) {
            Ok(mutation) => mutation,
            Err(rejection) => {
                debug!(key = %self.key, %request_id, reason = %rejection, "Command rejected locally");
                let _ = reply.send(Committed::failed(request_id, command, rejection.0));
                return;
            }
        };

        let expected = match &self.observed {
            Some(raw) => Ok(raw.clone()),
            None => serialize_projection(&self.projection),
        };
        let expected = match expected {
            Ok(expected) => expected,
            Err(rejection) => {
                error!(key = %self.key, %request_id, error = %rejection, "Cannot serialize projection");
                let _ = reply.send(Committed::failed(request_id, command, COMMIT_FAILED));
                return;
            }
        };

        if let Err(reply) = self.ledger.insert(request_id, reply) {
            let _ = reply.send(Committed::failed(request_id, command, DUPLICATE_REQUEST));
            return;
        }
        self.in_flight = Some(request_id);

        debug!(key = %self.key, %request_id, "Committing");

        let store = Arc::clone(&self.store);
        let policy = self.policy.clone();
        let internal = self.internal_tx.clone();
        let key = self.key.clone();
        let reducer = reducer_for::<A>(key.clone(), mutation.clone());

        tokio::spawn(async move {
            let result =
                idempotent_reduce_until_success(store.as_ref(), &key, expected, reducer, &policy)
                    .await;
            // A closed channel means the actor is gone; its caller gets no reply.
            let _ = internal.send(Internal::Finished {
                request_id,
                command,
                mutation,
                result,
            });
        });
    }

    fn handle_internal(&mut self, event: Internal<A>) {
        match event {
            Internal::Hydrated {
                epoch,
                projection,
                raw,
            } => {
                if epoch != self.hydration_epoch {
                    debug!(key = %self.key, "Discarding superseded hydration");
                    return;
                }
                info!(key = %self.key, "Projection hydrated from store");
                self.initialize(projection, raw);
            }
            Internal::Finished {
                request_id,
                command,
                mutation,
                result,
            } => self.on_finished(request_id, command, mutation, result),
        }
    }

    fn on_finished(
        &mut self,
        request_id: Uuid,
        command: A::Command,
        mutation: A::Mutation,
        result: Result<ReduceOutcome, ReduceError>,
    ) {
        self.in_flight = None;

        let event = match result {
            Ok(outcome) => {
                if outcome.attempts > 1 {
                    // Reduced against a refreshed value that may hold other writers' changes.
                    self.projection = deserialize_projection(&self.key, &outcome.value);
                } else if let Err(rejection) = A::apply(&mut self.projection, &mutation) {
                    warn!(
                        key = %self.key,
                        %request_id,
                        error = %rejection,
                        "Projection diverged from store, re-hydrating"
                    );
                    self.start_hydration();
                }
                self.observed = Some(outcome.value);
                debug!(key = %self.key, %request_id, attempts = outcome.attempts, "Committed");
                Committed::succeeded(request_id, command)
            }
            Err(ReduceError::Rejected(rejection)) => {
                self.observed = None;
                debug!(key = %self.key, %request_id, reason = %rejection, "Rejected against stored value");
                Committed::failed(request_id, command, rejection.0)
            }
            Err(err) => {
                self.observed = None;
                error!(key = %self.key, %request_id, error = %err, "Commit failed");
                Committed::failed(request_id, command, COMMIT_FAILED)
            }
        };

        self.on_committed(event);
        self.pump();
    }

    /// Resolve the ledger entry for a finished command.
    fn on_committed(&mut self, event: Committed<A::Command>) {
        let request_id = event.request_id;
        match self.ledger.remove(request_id) {
            Some(reply) => {
                if reply.send(event).is_err() {
                    debug!(key = %self.key, %request_id, "Caller went away, dropping reply");
                }
            }
            None => {
                error!(key = %self.key, %request_id, "No pending commit for finished request");
            }
        }
    }

    fn finish(self, mode: StopMode, mut mailbox: mpsc::Receiver<AggregateMessage<A>>) -> ActorExit<A> {
        mailbox.close();

        let Self {
            key,
            projection,
            phase,
            backlog,
            ..
        } = self;

        let mut pending: Vec<_> = backlog.into_iter().collect();
        while let Ok(message) = mailbox.try_recv() {
            pending.push(message);
        }

        match mode {
            StopMode::Shutdown => {
                if !pending.is_empty() {
                    warn!(%key, dropped = pending.len(), "Dropping unprocessed messages on shutdown");
                }
                info!(%key, "Aggregate actor stopped");
                ActorExit::Stopped
            }
            StopMode::Restart => {
                info!(%key, pending = pending.len(), "Aggregate actor handing off");
                ActorExit::Handoff {
                    projection: (phase == Phase::Ready).then_some(projection),
                    pending,
                }
            }
        }
    }
}

/// Ask a running actor for its projection.
pub async fn query<A: Aggregate>(
    mailbox: &mpsc::Sender<AggregateMessage<A>>,
) -> Option<A::Projection> {
    let (reply, rx) = oneshot::channel();
    mailbox.send(AggregateMessage::Query { reply }).await.ok()?;
    rx.await.ok()
}
