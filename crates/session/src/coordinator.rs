//! The session coordinator façade.

use std::collections::HashMap;
use std::sync::Arc;

use drill_client::{CancelToken, ExecutionClient, Executor, SubmitOutcome};
use drill_core::{
    Catalog, EngineConfig, EngineError, ExerciseId, OperationKind, ProgressRecord,
    QueuedOperation, Submission,
};
use drill_progress::Reconciler;
use drill_storage::Store;
use drill_sync::{ApiError, Connectivity, ProgressApi, SyncQueue};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use super::{RunState, SessionSnapshot};

/// Orchestrates the execution client, reconciler and sync queue behind a
/// small façade, and publishes every state transition on a watch channel.
///
/// Cheap to clone; all clones share the same session.
pub struct SessionCoordinator<S, E>
where
    S: Store + 'static,
    E: Executor + 'static,
{
    inner: Arc<Inner<S, E>>,
}

impl<S, E> Clone for SessionCoordinator<S, E>
where
    S: Store + 'static,
    E: Executor + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S, E>
where
    S: Store + 'static,
    E: Executor + 'static,
{
    catalog: Catalog,
    config: EngineConfig,
    store: Arc<Mutex<S>>,
    client: ExecutionClient<E>,
    reconciler: Reconciler<S>,
    queue: SyncQueue<S>,
    api: Arc<dyn ProgressApi>,
    connectivity: Connectivity,
    snapshot: watch::Sender<SessionSnapshot>,
    inflight: Mutex<HashMap<ExerciseId, CancelToken>>,
}

impl<S, E> SessionCoordinator<S, E>
where
    S: Store + 'static,
    E: Executor + 'static,
{
    /// Assemble the engine over a store, executor, progress endpoint and
    /// connectivity source.
    pub fn new(
        catalog: Catalog,
        config: EngineConfig,
        store: S,
        executor: E,
        api: Arc<dyn ProgressApi>,
        connectivity: Connectivity,
    ) -> Self {
        let store = Arc::new(Mutex::new(store));
        let client = ExecutionClient::new(executor, config.retry.clone(), config.submit_timeout);
        let reconciler = Reconciler::new(Arc::clone(&store));
        let queue = SyncQueue::new(Arc::clone(&store), config.queue_cap);

        let initial = SessionSnapshot {
            online: connectivity.is_online(),
            ..SessionSnapshot::default()
        };
        let (snapshot, _) = watch::channel(initial);

        Self {
            inner: Arc::new(Inner {
                catalog,
                config,
                store,
                client,
                reconciler,
                queue,
                api,
                connectivity,
                snapshot,
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to session state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Current number of operations awaiting server confirmation.
    pub async fn pending_operations(&self) -> usize {
        self.inner.queue.len().await
    }

    /// Recover persisted state and begin watching connectivity.
    ///
    /// Call once after construction. Replays the pending queue
    /// immediately when starting online with work left over from a
    /// previous session.
    pub async fn start(&self) -> Result<(), EngineError> {
        let inner = &self.inner;
        let floors = inner.reconciler.recover().await?;
        inner.client.seed_sequences(floors).await;
        inner.queue.load().await?;

        let pending = inner.queue.len().await;
        inner.publish(|s| s.pending_ops = pending);
        info!(pending, "session coordinator started");

        let listener = Arc::clone(inner);
        let mut rx = inner.connectivity.subscribe();
        tokio::spawn(async move {
            let mut was_online = *rx.borrow();
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                listener.publish(|s| s.online = online);
                if online && !was_online {
                    listener.sync_now().await;
                }
                was_online = online;
            }
        });

        if inner.connectivity.is_online() && !inner.queue.is_empty().await {
            inner.sync_now().await;
        }
        Ok(())
    }

    /// Start the periodic health probe.
    ///
    /// For hosts without native connectivity events; feeds the same
    /// signal the browser events would.
    pub fn spawn_connectivity_probe(&self) -> tokio::task::JoinHandle<()> {
        drill_sync::spawn_probe(
            self.inner.connectivity.clone(),
            Arc::clone(&self.inner.api),
            self.inner.config.probe_interval,
        )
    }

    /// Make an exercise current and surface its persisted state.
    pub async fn select_exercise(&self, id: &ExerciseId) -> Result<(), EngineError> {
        let inner = &self.inner;
        let Some(exercise) = inner.catalog.get(id).cloned() else {
            return Err(EngineError::Validation(format!("unknown exercise: {}", id)));
        };

        let (record, last_submission) = {
            let store = inner.store.lock().await;
            let record = store.load_record(id).await?;
            let last = store.list_submissions(id).await?.into_iter().next();
            (record, last)
        };

        inner.publish(move |s| {
            s.exercise = Some(exercise);
            s.record = record;
            s.last_submission = last_submission;
            s.run_state = RunState::Idle;
            s.last_error = None;
        });
        Ok(())
    }

    /// Dispatch the user's code for an exercise.
    ///
    /// At most one run is in flight per exercise: a second call while
    /// Running cancels the first and starts fresh. Completion is reported
    /// through the snapshot channel, never by blocking the caller.
    pub async fn run_code(&self, id: &ExerciseId, code: &str) -> Result<(), EngineError> {
        let inner = &self.inner;
        if !inner.catalog.contains(id) {
            return Err(EngineError::Validation(format!("unknown exercise: {}", id)));
        }
        if code.trim().is_empty() {
            return Err(EngineError::Validation(
                "submitted code is empty".to_string(),
            ));
        }

        let token = CancelToken::new();
        {
            let mut inflight = inner.inflight.lock().await;
            if let Some(previous) = inflight.insert(id.clone(), token.clone()) {
                debug!(exercise = %id, "superseding in-flight run");
                previous.cancel();
            }
        }

        inner.publish_if_current(id, |s| {
            s.run_state = RunState::Running;
            s.last_error = None;
        });

        let runner = Arc::clone(inner);
        let id = id.clone();
        let code = code.to_string();
        tokio::spawn(async move {
            match runner.client.submit(&id, &code, &token).await {
                Ok(SubmitOutcome::Completed(submission)) => {
                    if let Err(e) = runner.finish_run(submission).await {
                        error!(exercise = %id, error = %e, "failed to record outcome");
                        runner.publish_if_current(&id, |s| {
                            s.last_error = Some(e.to_string());
                        });
                    }
                }
                Ok(SubmitOutcome::Cancelled) => {
                    debug!(exercise = %id, "run superseded, result discarded");
                }
                Err(e) => {
                    runner.publish_if_current(&id, |s| {
                        s.run_state = RunState::Idle;
                        s.last_error = Some(e.to_string());
                    });
                }
            }

            let mut inflight = runner.inflight.lock().await;
            if inflight
                .get(&id)
                .map(|current| current.same_token(&token))
                .unwrap_or(false)
            {
                inflight.remove(&id);
            }
        });

        Ok(())
    }

    /// Persisted submission history for an exercise, newest first,
    /// bounded by the retention cap.
    pub async fn submission_history(
        &self,
        id: &ExerciseId,
    ) -> Result<Vec<Submission>, EngineError> {
        let store = self.inner.store.lock().await;
        Ok(store.list_submissions(id).await?)
    }

    /// Flip the bookmark flag for an exercise.
    pub async fn toggle_bookmark(&self, id: &ExerciseId) -> Result<bool, EngineError> {
        let inner = &self.inner;
        if !inner.catalog.contains(id) {
            return Err(EngineError::Validation(format!("unknown exercise: {}", id)));
        }

        let (record, on) = {
            let mut store = inner.store.lock().await;
            let mut record = store
                .load_record(id)
                .await?
                .unwrap_or_else(|| ProgressRecord::new(id.clone()));
            let on = !record.bookmarked;
            record.set_bookmark(on);
            store.save_record(&record).await?;
            (record, on)
        };

        let op = QueuedOperation::new(
            id.clone(),
            OperationKind::SetBookmark {
                on,
                version: record.version,
            },
        );

        inner.publish_if_current(id, {
            let record = record.clone();
            move |s| s.record = Some(record)
        });
        inner.confirm_or_enqueue(op).await?;
        Ok(on)
    }
}

impl<S, E> Inner<S, E>
where
    S: Store + 'static,
    E: Executor + 'static,
{
    /// Persist a terminal submission and propagate it to the server.
    async fn finish_run(&self, submission: Submission) -> Result<(), EngineError> {
        let status = submission.status;
        let Some(record) = self.reconciler.apply(&submission).await? else {
            // Superseded by a newer sequence; nothing to surface.
            return Ok(());
        };

        self.publish_if_current(&submission.exercise_id, {
            let record = record.clone();
            let submission = submission.clone();
            move |s| {
                s.run_state = RunState::Finished(status);
                s.last_submission = Some(submission);
                s.record = Some(record);
            }
        });

        let op = QueuedOperation::new(
            submission.exercise_id.clone(),
            OperationKind::MarkStatus {
                status: record.best,
                version: record.version,
            },
        );
        self.confirm_or_enqueue(op).await
    }

    /// Deliver a mutation now when the server is reachable, otherwise
    /// buffer it for the next drain. A 4xx rejection is terminal: the
    /// mutation is surfaced as an error and never queued.
    async fn confirm_or_enqueue(&self, op: QueuedOperation) -> Result<(), EngineError> {
        if self.connectivity.is_online() {
            match self.api.apply(&op).await {
                Ok(server_record) => {
                    self.absorb_server_record(server_record).await?;
                    return Ok(());
                }
                Err(ApiError::Rejected { status, message }) => {
                    warn!(operation = %op.id, status, "progress endpoint rejected mutation");
                    self.publish(move |s| {
                        s.last_error =
                            Some(format!("progress sync rejected ({}): {}", status, message));
                    });
                    return Ok(());
                }
                Err(ApiError::Transient(reason)) => {
                    debug!(operation = %op.id, %reason, "server unreachable, queueing mutation");
                }
            }
        }

        let exercise_id = op.exercise_id.clone();
        let dropped = self.queue.enqueue(op).await?;
        let pending = self.queue.len().await;
        let warning = self.queue.overflow_warning();
        self.publish(move |s| {
            s.pending_ops = pending;
            s.queue_warning = warning;
        });
        if let Some(dropped) = dropped {
            let overflow = EngineError::QueueOverflow { dropped };
            warn!(exercise = %exercise_id, "surfacing queue overflow");
            self.publish(move |s| s.last_error = Some(overflow.to_string()));
        }
        Ok(())
    }

    /// Drain the pending queue and reconcile every server confirmation.
    async fn sync_now(&self) {
        let outcome = match self.queue.drain(self.api.as_ref(), &self.config.retry).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "queue drain failed");
                self.publish(move |s| s.last_error = Some(e.to_string()));
                return;
            }
        };

        info!(
            applied = outcome.applied.len(),
            rejected = outcome.rejected.len(),
            remaining = outcome.remaining,
            "queue drained"
        );
        for record in outcome.applied {
            if let Err(e) = self.absorb_server_record(record).await {
                error!(error = %e, "failed to reconcile server record");
            }
        }
        if let Some(e) = outcome.rejected.into_iter().last() {
            self.publish(move |s| s.last_error = Some(e.to_string()));
        }

        let remaining = self.queue.len().await;
        if remaining == 0 {
            self.queue.clear_overflow_warning();
        }
        let warning = self.queue.overflow_warning();
        self.publish(move |s| {
            s.pending_ops = remaining;
            s.queue_warning = warning;
        });
    }

    /// Merge an authoritative record and surface the result.
    async fn absorb_server_record(&self, server: ProgressRecord) -> Result<(), EngineError> {
        let merge = self.reconciler.merge_server(server).await?;
        let exercise_id = merge.record.exercise_id.clone();
        let conflict = merge.conflict.map(|c| c.to_string());
        let record = merge.record;
        self.publish_if_current(&exercise_id, move |s| {
            s.record = Some(record);
            if let Some(conflict) = conflict {
                s.last_error = Some(conflict);
            }
        });
        Ok(())
    }

    fn publish<F: FnOnce(&mut SessionSnapshot)>(&self, f: F) {
        self.snapshot.send_modify(f);
    }

    /// Publish a change that concerns one exercise, but only when that
    /// exercise is the selected one - the snapshot describes the current
    /// session, other exercises' state lives in the store.
    fn publish_if_current<F: FnOnce(&mut SessionSnapshot)>(&self, id: &ExerciseId, f: F) {
        self.snapshot.send_modify(|s| {
            let current = s.exercise.as_ref().map(|e| &e.id == id).unwrap_or(false);
            if current {
                f(s);
            }
        });
    }
}
