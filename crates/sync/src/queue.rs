//! Pending-operation queue with per-exercise FIFO lanes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use drill_core::{
    EngineError, ExerciseId, OperationId, ProgressRecord, QueuedOperation, RetryPolicy,
};
use drill_storage::Store;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{ApiError, ProgressApi};

#[derive(Default)]
struct Lanes {
    by_exercise: HashMap<ExerciseId, VecDeque<QueuedOperation>>,
    // Ops taken out by an active drain but not yet server-confirmed.
    // They stay in the persisted snapshot until the drain finishes, so a
    // crash mid-drain cannot lose them; re-delivery is idempotent.
    inflight: Vec<QueuedOperation>,
    total: usize,
}

impl Lanes {
    fn push(&mut self, op: QueuedOperation) {
        self.by_exercise
            .entry(op.exercise_id.clone())
            .or_default()
            .push_back(op);
        self.total += 1;
    }

    /// Remove the eviction candidate: the oldest non-essential operation,
    /// falling back to the oldest overall when everything is essential.
    fn evict(&mut self) -> Option<QueuedOperation> {
        let mut pick: Option<(ExerciseId, usize, drill_core::Time, bool)> = None;
        for (lane_id, lane) in &self.by_exercise {
            for (idx, op) in lane.iter().enumerate() {
                let essential = op.kind.is_essential();
                let better = match &pick {
                    None => true,
                    Some((_, _, picked_at, picked_essential)) => {
                        (!essential && *picked_essential)
                            || (essential == *picked_essential && op.created_at < *picked_at)
                    }
                };
                if better {
                    pick = Some((lane_id.clone(), idx, op.created_at, essential));
                }
            }
        }

        let (lane_id, idx, _, _) = pick?;
        let op = self.by_exercise.get_mut(&lane_id)?.remove(idx)?;
        self.total -= 1;
        if self.by_exercise[&lane_id].is_empty() {
            self.by_exercise.remove(&lane_id);
        }
        Some(op)
    }

    /// Flatten into creation order for persistence, in-flight ops
    /// included. Stable sort keeps per-lane FIFO order intact across
    /// equal timestamps.
    fn snapshot(&self) -> Vec<QueuedOperation> {
        let mut all: Vec<QueuedOperation> = self
            .by_exercise
            .values()
            .flat_map(|lane| lane.iter().cloned())
            .chain(self.inflight.iter().cloned())
            .collect();
        all.sort_by_key(|op| op.created_at);
        all
    }
}

/// Result of a drain pass.
#[derive(Debug)]
pub struct DrainOutcome {
    /// Authoritative records returned by the server, in delivery order
    pub applied: Vec<ProgressRecord>,
    /// Terminal rejections; the operations were dropped, not re-queued
    pub rejected: Vec<EngineError>,
    /// Operations still queued after the pass
    pub remaining: usize,
}

/// Buffer for progress mutations awaiting server confirmation.
///
/// Operations replay FIFO per exercise; cross-exercise order is
/// unconstrained. The queue persists through the store so a restart
/// resumes where the last session left off.
pub struct SyncQueue<S: Store> {
    store: Arc<Mutex<S>>,
    lanes: Mutex<Lanes>,
    cap: usize,
    overflowed: AtomicBool,
}

impl<S: Store> SyncQueue<S> {
    /// Create a queue holding at most `cap` pending operations.
    pub fn new(store: Arc<Mutex<S>>, cap: usize) -> Self {
        Self {
            store,
            lanes: Mutex::new(Lanes::default()),
            cap,
            overflowed: AtomicBool::new(false),
        }
    }

    /// Reload persisted operations. Call once at startup.
    pub async fn load(&self) -> Result<(), EngineError> {
        let persisted = self.store.lock().await.load_queue().await?;
        let mut lanes = self.lanes.lock().await;
        for op in persisted {
            lanes.push(op);
        }
        Ok(())
    }

    /// Queue a mutation for later delivery.
    ///
    /// Returns the id of an operation evicted under overflow, if any; the
    /// caller surfaces that as a user-visible warning.
    pub async fn enqueue(
        &self,
        op: QueuedOperation,
    ) -> Result<Option<OperationId>, EngineError> {
        let mut lanes = self.lanes.lock().await;
        debug!(operation = %op.id, exercise = %op.exercise_id, "queueing operation");
        lanes.push(op);

        let mut dropped = None;
        if lanes.total > self.cap {
            if let Some(evicted) = lanes.evict() {
                warn!(
                    operation = %evicted.id,
                    exercise = %evicted.exercise_id,
                    cap = self.cap,
                    "queue overflow, dropping oldest non-essential operation"
                );
                self.overflowed.store(true, Ordering::Relaxed);
                dropped = Some(evicted.id);
            }
        }

        self.persist(&lanes).await?;
        Ok(dropped)
    }

    /// Number of pending operations.
    pub async fn len(&self) -> usize {
        self.lanes.lock().await.total
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether an overflow eviction has happened since the last clear.
    pub fn overflow_warning(&self) -> bool {
        self.overflowed.load(Ordering::Relaxed)
    }

    /// Acknowledge the overflow warning.
    pub fn clear_overflow_warning(&self) {
        self.overflowed.store(false, Ordering::Relaxed);
    }

    /// Replay queued operations against the server.
    ///
    /// Each exercise lane drains FIFO; a transient failure stops that
    /// lane and re-queues its remainder ahead of anything enqueued
    /// meanwhile, preserving delivery order. A 4xx rejection is terminal:
    /// the operation is dropped and the lane continues. Other lanes
    /// proceed independently.
    pub async fn drain(
        &self,
        api: &dyn ProgressApi,
        policy: &RetryPolicy,
    ) -> Result<DrainOutcome, EngineError> {
        let taken = {
            let mut lanes = self.lanes.lock().await;
            let taken = std::mem::take(&mut lanes.by_exercise);
            lanes.inflight = taken.values().flat_map(|l| l.iter().cloned()).collect();
            lanes.total = 0;
            taken
        };

        let mut applied = Vec::new();
        let mut rejected = Vec::new();
        let mut kept: HashMap<ExerciseId, VecDeque<QueuedOperation>> = HashMap::new();

        for (exercise_id, mut lane) in taken {
            while let Some(mut op) = lane.pop_front() {
                match deliver(api, policy, &mut op).await {
                    Ok(record) => applied.push(record),
                    Err(e @ EngineError::ServerRejection { .. }) => {
                        warn!(
                            operation = %op.id,
                            exercise = %exercise_id,
                            error = %e,
                            "dropping terminally rejected operation"
                        );
                        rejected.push(e);
                    }
                    Err(e) => {
                        warn!(
                            operation = %op.id,
                            exercise = %exercise_id,
                            error = %e,
                            "drain stopped for lane, re-queueing remainder"
                        );
                        lane.push_front(op);
                        break;
                    }
                }
            }
            if !lane.is_empty() {
                kept.insert(exercise_id, lane);
            }
        }

        let remaining = {
            let mut lanes = self.lanes.lock().await;
            lanes.inflight.clear();
            for (exercise_id, mut lane) in kept {
                // Anything enqueued during the drain goes behind the
                // re-queued remainder.
                if let Some(newer) = lanes.by_exercise.remove(&exercise_id) {
                    lane.extend(newer);
                }
                lanes.by_exercise.insert(exercise_id, lane);
            }
            lanes.total = lanes.by_exercise.values().map(|l| l.len()).sum();
            self.persist(&lanes).await?;
            lanes.total
        };

        Ok(DrainOutcome {
            applied,
            rejected,
            remaining,
        })
    }

    async fn persist(&self, lanes: &Lanes) -> Result<(), EngineError> {
        self.store
            .lock()
            .await
            .save_queue(&lanes.snapshot())
            .await?;
        Ok(())
    }
}

/// Deliver one operation with the backoff policy.
async fn deliver(
    api: &dyn ProgressApi,
    policy: &RetryPolicy,
    op: &mut QueuedOperation,
) -> Result<ProgressRecord, EngineError> {
    let mut attempt = 0u32;
    loop {
        op.attempts += 1;
        match api.apply(op).await {
            Ok(record) => return Ok(record),
            Err(ApiError::Rejected { status, message }) => {
                return Err(EngineError::ServerRejection { status, message });
            }
            Err(ApiError::Transient(reason)) => {
                if !policy.should_retry(attempt) {
                    return Err(EngineError::TransientNetwork(reason));
                }
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use drill_core::{BestStatus, OperationKind};
    use drill_storage::MemoryStore;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MockApi {
        records: StdMutex<HashMap<ExerciseId, ProgressRecord>>,
        failing: StdMutex<HashSet<ExerciseId>>,
        rejecting: StdMutex<HashSet<ExerciseId>>,
        applied_log: StdMutex<Vec<OperationId>>,
    }

    impl MockApi {
        fn fail_exercise(&self, id: ExerciseId) {
            self.failing.lock().unwrap().insert(id);
        }

        fn reject_exercise(&self, id: ExerciseId) {
            self.rejecting.lock().unwrap().insert(id);
        }

        fn record(&self, id: &ExerciseId) -> Option<ProgressRecord> {
            self.records.lock().unwrap().get(id).cloned()
        }

        fn applied_count(&self) -> usize {
            self.applied_log.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ProgressApi for MockApi {
        async fn apply(&self, op: &QueuedOperation) -> Result<ProgressRecord, ApiError> {
            if self.failing.lock().unwrap().contains(&op.exercise_id) {
                return Err(ApiError::Transient("offline".into()));
            }
            if self.rejecting.lock().unwrap().contains(&op.exercise_id) {
                return Err(ApiError::Rejected {
                    status: 422,
                    message: "unknown exercise".into(),
                });
            }
            let mut records = self.records.lock().unwrap();
            let record = records
                .entry(op.exercise_id.clone())
                .or_insert_with(|| ProgressRecord::new(op.exercise_id.clone()));

            // Idempotent: already at or beyond the target version is a no-op.
            if record.version < op.kind.target_version() {
                match &op.kind {
                    OperationKind::MarkStatus { status, version } => {
                        if *status > record.best {
                            record.best = *status;
                        }
                        record.attempts += 1;
                        record.version = *version;
                    }
                    OperationKind::SetBookmark { on, version } => {
                        record.bookmarked = *on;
                        record.version = *version;
                    }
                }
                self.applied_log.lock().unwrap().push(op.id);
            }
            Ok(record.clone())
        }

        async fn fetch(&self, id: &ExerciseId) -> Result<Option<ProgressRecord>, ApiError> {
            Ok(self.record(id))
        }

        async fn ping(&self) -> bool {
            true
        }
    }

    fn no_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            jitter: 0.0,
            ..RetryPolicy::default()
        }
    }

    fn queue(cap: usize) -> SyncQueue<MemoryStore> {
        SyncQueue::new(Arc::new(Mutex::new(MemoryStore::new(10))), cap)
    }

    fn mark(id: &str, version: u64) -> QueuedOperation {
        QueuedOperation::new(
            ExerciseId::new(id),
            OperationKind::MarkStatus {
                status: BestStatus::Succeeded,
                version,
            },
        )
    }

    fn bookmark(id: &str, version: u64) -> QueuedOperation {
        QueuedOperation::new(
            ExerciseId::new(id),
            OperationKind::SetBookmark { on: true, version },
        )
    }

    #[tokio::test]
    async fn drain_applies_fifo_per_exercise() {
        let q = queue(10);
        let api = MockApi::default();
        for version in 1..=3u64 {
            q.enqueue(mark("e1", version)).await.unwrap();
        }

        let outcome = q.drain(&api, &no_retry()).await.unwrap();
        assert_eq!(outcome.applied.len(), 3);
        assert_eq!(outcome.remaining, 0);
        assert!(q.is_empty().await);
        assert_eq!(api.record(&ExerciseId::new("e1")).unwrap().version, 3);
    }

    #[tokio::test]
    async fn drain_stops_failed_lane_but_continues_others() {
        let q = queue(10);
        let api = MockApi::default();
        api.fail_exercise(ExerciseId::new("e1"));

        q.enqueue(mark("e1", 1)).await.unwrap();
        q.enqueue(mark("e1", 2)).await.unwrap();
        q.enqueue(mark("e2", 1)).await.unwrap();

        let outcome = q.drain(&api, &no_retry()).await.unwrap();
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(outcome.remaining, 2);
        assert_eq!(q.len().await, 2);
        assert!(api.record(&ExerciseId::new("e2")).is_some());
        assert!(api.record(&ExerciseId::new("e1")).is_none());
    }

    #[tokio::test]
    async fn replaying_a_delivered_operation_is_a_noop() {
        let q = queue(10);
        let api = MockApi::default();

        let op = mark("e1", 1);
        q.enqueue(op.clone()).await.unwrap();
        q.drain(&api, &no_retry()).await.unwrap();
        let first = api.record(&ExerciseId::new("e1")).unwrap();

        // Duplicate delivery after partial network failure.
        q.enqueue(op).await.unwrap();
        q.drain(&api, &no_retry()).await.unwrap();
        let second = api.record(&ExerciseId::new("e1")).unwrap();

        assert_eq!(first, second);
        assert_eq!(api.applied_count(), 1);
    }

    #[tokio::test]
    async fn overflow_prefers_oldest_non_essential() {
        let q = queue(2);
        q.enqueue(mark("e1", 1)).await.unwrap();
        q.enqueue(bookmark("e2", 1)).await.unwrap();

        let dropped = q.enqueue(mark("e3", 1)).await.unwrap();
        assert!(dropped.is_some());
        assert!(q.overflow_warning());
        assert_eq!(q.len().await, 2);

        // The bookmark went, both status marks stayed.
        let api = MockApi::default();
        q.drain(&api, &no_retry()).await.unwrap();
        assert!(api.record(&ExerciseId::new("e1")).is_some());
        assert!(api.record(&ExerciseId::new("e2")).is_none());
        assert!(api.record(&ExerciseId::new("e3")).is_some());
    }

    #[tokio::test]
    async fn overflow_falls_back_to_oldest_essential() {
        let q = queue(1);
        q.enqueue(mark("e1", 1)).await.unwrap();
        let dropped = q.enqueue(mark("e2", 1)).await.unwrap();

        assert!(dropped.is_some());
        assert_eq!(q.len().await, 1);

        let api = MockApi::default();
        q.drain(&api, &no_retry()).await.unwrap();
        assert!(api.record(&ExerciseId::new("e2")).is_some());
    }

    #[tokio::test]
    async fn rejected_operations_are_dropped_not_requeued() {
        let q = queue(10);
        let api = MockApi::default();
        api.reject_exercise(ExerciseId::new("e1"));

        q.enqueue(mark("e1", 1)).await.unwrap();
        q.enqueue(mark("e1", 2)).await.unwrap();
        q.enqueue(mark("e2", 1)).await.unwrap();

        let outcome = q.drain(&api, &no_retry()).await.unwrap();
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(outcome.rejected.len(), 2);
        assert_eq!(outcome.remaining, 0);
        assert!(q.is_empty().await);
        assert!(outcome
            .rejected
            .iter()
            .all(|e| matches!(e, EngineError::ServerRejection { status: 422, .. })));

        // Nothing left to re-attempt on the next pass.
        let second = q.drain(&api, &no_retry()).await.unwrap();
        assert!(second.applied.is_empty());
        assert!(second.rejected.is_empty());
    }

    #[tokio::test]
    async fn enqueue_during_drain_keeps_undelivered_ops_persisted() {
        struct GatedApi {
            inner: MockApi,
            gate: tokio::sync::Semaphore,
        }

        #[async_trait]
        impl ProgressApi for GatedApi {
            async fn apply(
                &self,
                op: &QueuedOperation,
            ) -> Result<ProgressRecord, ApiError> {
                self.gate.acquire().await.unwrap().forget();
                self.inner.apply(op).await
            }

            async fn fetch(
                &self,
                id: &ExerciseId,
            ) -> Result<Option<ProgressRecord>, ApiError> {
                self.inner.fetch(id).await
            }

            async fn ping(&self) -> bool {
                true
            }
        }

        let store = Arc::new(Mutex::new(MemoryStore::new(10)));
        let q = Arc::new(SyncQueue::new(Arc::clone(&store), 10));
        q.enqueue(mark("e1", 1)).await.unwrap();
        q.enqueue(mark("e1", 2)).await.unwrap();

        let api = Arc::new(GatedApi {
            inner: MockApi::default(),
            gate: tokio::sync::Semaphore::new(0),
        });
        let drain = {
            let q = Arc::clone(&q);
            let api = Arc::clone(&api);
            tokio::spawn(async move { q.drain(api.as_ref(), &no_retry()).await })
        };
        tokio::task::yield_now().await;

        // A snapshot written mid-drain must still carry the two
        // undelivered in-flight operations.
        q.enqueue(bookmark("e2", 1)).await.unwrap();
        let persisted = store.lock().await.load_queue().await.unwrap();
        assert_eq!(persisted.len(), 3);

        api.gate.add_permits(2);
        let outcome = drain.await.unwrap().unwrap();
        assert_eq!(outcome.applied.len(), 2);
        assert_eq!(outcome.remaining, 1);
        assert_eq!(store.lock().await.load_queue().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn queue_reloads_from_store() {
        let store = Arc::new(Mutex::new(MemoryStore::new(10)));
        {
            let q = SyncQueue::new(Arc::clone(&store), 10);
            q.enqueue(mark("e1", 1)).await.unwrap();
            q.enqueue(mark("e1", 2)).await.unwrap();
        }

        let q = SyncQueue::new(store, 10);
        q.load().await.unwrap();
        assert_eq!(q.len().await, 2);

        let api = MockApi::default();
        let outcome = q.drain(&api, &no_retry()).await.unwrap();
        assert_eq!(outcome.applied.len(), 2);
        assert_eq!(api.record(&ExerciseId::new("e1")).unwrap().version, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_and_retry() {
        struct FlakyApi {
            inner: MockApi,
            failures_left: StdMutex<u32>,
        }

        #[async_trait]
        impl ProgressApi for FlakyApi {
            async fn apply(
                &self,
                op: &QueuedOperation,
            ) -> Result<ProgressRecord, ApiError> {
                {
                    let mut left = self.failures_left.lock().unwrap();
                    if *left > 0 {
                        *left -= 1;
                        return Err(ApiError::Transient("flaky".into()));
                    }
                }
                self.inner.apply(op).await
            }

            async fn fetch(
                &self,
                id: &ExerciseId,
            ) -> Result<Option<ProgressRecord>, ApiError> {
                self.inner.fetch(id).await
            }

            async fn ping(&self) -> bool {
                true
            }
        }

        let q = queue(10);
        let api = FlakyApi {
            inner: MockApi::default(),
            failures_left: StdMutex::new(2),
        };
        q.enqueue(mark("e1", 1)).await.unwrap();

        let policy = RetryPolicy {
            max_attempts: 3,
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        let outcome = q.drain(&api, &policy).await.unwrap();
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(outcome.remaining, 0);
    }
}
