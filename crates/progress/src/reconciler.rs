//! Deterministic merge of outcomes into progress records.

use std::collections::HashMap;
use std::sync::Arc;

use drill_core::{
    BestStatus, EngineError, ExerciseId, ProgressRecord, Submission,
};
use drill_storage::Store;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Result of merging a server-confirmed record.
#[derive(Debug, Clone)]
pub struct ServerMerge {
    /// The record now considered current
    pub record: ProgressRecord,
    /// Set when local and server disagreed at the same version
    pub conflict: Option<EngineError>,
}

/// Applies terminal outcomes and server records to local progress state.
///
/// Holds the per-exercise sequence floor: submissions at or below the
/// floor are stale (superseded by a newer run) and are dropped without
/// touching state.
pub struct Reconciler<S: Store> {
    store: Arc<Mutex<S>>,
    floors: Mutex<HashMap<ExerciseId, u64>>,
}

impl<S: Store> Reconciler<S> {
    /// Create a reconciler over the shared store.
    pub fn new(store: Arc<Mutex<S>>) -> Self {
        Self {
            store,
            floors: Mutex::new(HashMap::new()),
        }
    }

    /// Rebuild sequence floors from persisted submission history.
    ///
    /// Returns the floors so the caller can seed the execution client's
    /// sequence counters, keeping numbers strictly increasing across a
    /// process restart.
    pub async fn recover(&self) -> Result<HashMap<ExerciseId, u64>, EngineError> {
        let mut seeds = HashMap::new();
        let store = self.store.lock().await;
        for record in store.list_records().await? {
            let history = store.list_submissions(&record.exercise_id).await?;
            if let Some(latest) = history.first() {
                seeds.insert(record.exercise_id.clone(), latest.sequence);
            }
        }
        drop(store);

        let mut floors = self.floors.lock().await;
        for (exercise_id, floor) in &seeds {
            floors.insert(exercise_id.clone(), *floor);
        }
        Ok(seeds)
    }

    /// Apply a terminal submission outcome.
    ///
    /// Returns the updated record, or `None` when the submission is stale
    /// (sequence at or below the last applied one) and was discarded.
    pub async fn apply(
        &self,
        submission: &Submission,
    ) -> Result<Option<ProgressRecord>, EngineError> {
        let Some(outcome) = BestStatus::from_terminal(submission.status) else {
            return Err(EngineError::Validation(format!(
                "cannot reconcile non-terminal status {}",
                submission.status
            )));
        };

        {
            let floors = self.floors.lock().await;
            let floor = floors
                .get(&submission.exercise_id)
                .copied()
                .unwrap_or_default();
            if submission.sequence <= floor {
                debug!(
                    exercise = %submission.exercise_id,
                    sequence = submission.sequence,
                    floor,
                    "dropping stale submission result"
                );
                return Ok(None);
            }
        }

        let mut store = self.store.lock().await;
        let mut record = store
            .load_record(&submission.exercise_id)
            .await?
            .unwrap_or_else(|| ProgressRecord::new(submission.exercise_id.clone()));

        record.note_attempt(outcome, submission.submitted_at);

        store.save_submission(submission).await?;
        store.save_record(&record).await?;

        // Only a persisted outcome raises the floor; a failed write leaves
        // the submission re-appliable.
        let mut floors = self.floors.lock().await;
        let floor = floors.entry(submission.exercise_id.clone()).or_insert(0);
        if submission.sequence > *floor {
            *floor = submission.sequence;
        }
        drop(floors);

        debug!(
            exercise = %submission.exercise_id,
            best = %record.best,
            version = record.version,
            "outcome reconciled"
        );
        Ok(Some(record))
    }

    /// Merge a server-confirmed record into local state.
    ///
    /// A higher server version wins wholesale; an equal version with
    /// different content is an inconsistency, resolved by preferring the
    /// server copy and reporting the conflict alongside.
    pub async fn merge_server(
        &self,
        server: ProgressRecord,
    ) -> Result<ServerMerge, EngineError> {
        let mut store = self.store.lock().await;
        let local = store.load_record(&server.exercise_id).await?;

        let merge = match local {
            None => {
                store.save_record(&server).await?;
                ServerMerge {
                    record: server,
                    conflict: None,
                }
            }
            Some(local) if server.version > local.version => {
                store.save_record(&server).await?;
                ServerMerge {
                    record: server,
                    conflict: None,
                }
            }
            Some(local) if server.version == local.version => {
                if local.same_content(&server) {
                    ServerMerge {
                        record: local,
                        conflict: None,
                    }
                } else {
                    let conflict = EngineError::ConflictInconsistency {
                        exercise_id: server.exercise_id.clone(),
                        version: server.version,
                    };
                    warn!(
                        exercise = %server.exercise_id,
                        version = server.version,
                        "local and server records disagree at equal version, preferring server"
                    );
                    store.save_record(&server).await?;
                    ServerMerge {
                        record: server,
                        conflict: Some(conflict),
                    }
                }
            }
            // Local is ahead: keep it, the delta is still queued for delivery.
            Some(local) => ServerMerge {
                record: local,
                conflict: None,
            },
        };

        Ok(merge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drill_core::SubmissionStatus;
    use drill_storage::MemoryStore;

    fn reconciler() -> Reconciler<MemoryStore> {
        Reconciler::new(Arc::new(Mutex::new(MemoryStore::new(10))))
    }

    fn submission(id: &str, sequence: u64, status: SubmissionStatus) -> Submission {
        let mut s = Submission::new(ExerciseId::new(id), "code", sequence);
        s.status = status;
        s
    }

    #[tokio::test]
    async fn first_outcome_creates_record() {
        let r = reconciler();
        let record = r
            .apply(&submission("e1", 1, SubmissionStatus::Failed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.best, BestStatus::Failed);
        assert_eq!(record.attempts, 1);
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn status_never_regresses() {
        let r = reconciler();
        r.apply(&submission("e1", 1, SubmissionStatus::Succeeded))
            .await
            .unwrap();
        let record = r
            .apply(&submission("e1", 2, SubmissionStatus::TimedOut))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.best, BestStatus::Succeeded);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn stale_sequence_is_discarded() {
        let r = reconciler();
        r.apply(&submission("e1", 6, SubmissionStatus::Succeeded))
            .await
            .unwrap();

        // Sequence 5's response arrives after sequence 6 completed.
        let stale = r
            .apply(&submission("e1", 5, SubmissionStatus::Failed))
            .await
            .unwrap();
        assert!(stale.is_none());

        let store = r.store.lock().await;
        let record = store
            .load_record(&ExerciseId::new("e1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.best, BestStatus::Succeeded);
        assert_eq!(record.version, 1);
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test]
    async fn non_terminal_outcome_is_invalid() {
        let r = reconciler();
        let err = r
            .apply(&submission("e1", 1, SubmissionStatus::Running))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn failed_store_write_leaves_sequence_reappliable() {
        struct FlakyStore {
            inner: MemoryStore,
            fail_next_save: bool,
        }

        #[async_trait::async_trait]
        impl Store for FlakyStore {
            async fn save_record(
                &mut self,
                record: &ProgressRecord,
            ) -> drill_storage::Result<()> {
                self.inner.save_record(record).await
            }

            async fn load_record(
                &self,
                id: &ExerciseId,
            ) -> drill_storage::Result<Option<ProgressRecord>> {
                self.inner.load_record(id).await
            }

            async fn list_records(&self) -> drill_storage::Result<Vec<ProgressRecord>> {
                self.inner.list_records().await
            }

            async fn save_submission(
                &mut self,
                submission: &Submission,
            ) -> drill_storage::Result<()> {
                if self.fail_next_save {
                    self.fail_next_save = false;
                    return Err(drill_storage::StoreError::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "disk full",
                    )));
                }
                self.inner.save_submission(submission).await
            }

            async fn list_submissions(
                &self,
                id: &ExerciseId,
            ) -> drill_storage::Result<Vec<Submission>> {
                self.inner.list_submissions(id).await
            }

            async fn save_queue(
                &mut self,
                ops: &[drill_core::QueuedOperation],
            ) -> drill_storage::Result<()> {
                self.inner.save_queue(ops).await
            }

            async fn load_queue(
                &self,
            ) -> drill_storage::Result<Vec<drill_core::QueuedOperation>> {
                self.inner.load_queue().await
            }
        }

        let store = Arc::new(Mutex::new(FlakyStore {
            inner: MemoryStore::new(10),
            fail_next_save: true,
        }));
        let r = Reconciler::new(store);

        let err = r
            .apply(&submission("e1", 1, SubmissionStatus::Succeeded))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));

        // The floor did not advance, so the same outcome applies cleanly
        // once the store recovers.
        let record = r
            .apply(&submission("e1", 1, SubmissionStatus::Succeeded))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test]
    async fn recovered_floors_reject_replayed_sequences() {
        let store = Arc::new(Mutex::new(MemoryStore::new(10)));
        {
            let r = Reconciler::new(Arc::clone(&store));
            r.apply(&submission("e1", 3, SubmissionStatus::Succeeded))
                .await
                .unwrap();
        }

        let r = Reconciler::new(store);
        let seeds = r.recover().await.unwrap();
        assert_eq!(seeds.get(&ExerciseId::new("e1")), Some(&3));

        assert!(r
            .apply(&submission("e1", 3, SubmissionStatus::Failed))
            .await
            .unwrap()
            .is_none());
        assert!(r
            .apply(&submission("e1", 4, SubmissionStatus::Failed))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn higher_server_version_wins_wholesale() {
        let r = reconciler();
        r.apply(&submission("e1", 1, SubmissionStatus::Failed))
            .await
            .unwrap();

        let mut server = ProgressRecord::new(ExerciseId::new("e1"));
        server.best = BestStatus::Succeeded;
        server.attempts = 5;
        server.version = 7;

        let merge = r.merge_server(server.clone()).await.unwrap();
        assert!(merge.conflict.is_none());
        assert_eq!(merge.record, server);
    }

    #[tokio::test]
    async fn local_ahead_of_server_is_kept() {
        let r = reconciler();
        let local = r
            .apply(&submission("e1", 1, SubmissionStatus::Succeeded))
            .await
            .unwrap()
            .unwrap();

        let server = ProgressRecord::new(ExerciseId::new("e1"));
        let merge = r.merge_server(server).await.unwrap();
        assert!(merge.conflict.is_none());
        assert_eq!(merge.record, local);
    }

    #[tokio::test]
    async fn equal_version_mismatch_flags_conflict_and_prefers_server() {
        let r = reconciler();
        r.apply(&submission("e1", 1, SubmissionStatus::Failed))
            .await
            .unwrap();

        let mut server = ProgressRecord::new(ExerciseId::new("e1"));
        server.best = BestStatus::Succeeded;
        server.attempts = 1;
        server.version = 1;

        let merge = r.merge_server(server.clone()).await.unwrap();
        assert!(matches!(
            merge.conflict,
            Some(EngineError::ConflictInconsistency { .. })
        ));
        assert_eq!(merge.record, server);

        let store = r.store.lock().await;
        let persisted = store
            .load_record(&ExerciseId::new("e1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted, server);
    }

    #[tokio::test]
    async fn equal_version_same_content_is_quiet() {
        let r = reconciler();
        let local = r
            .apply(&submission("e1", 1, SubmissionStatus::Failed))
            .await
            .unwrap()
            .unwrap();

        let merge = r.merge_server(local.clone()).await.unwrap();
        assert!(merge.conflict.is_none());
        assert_eq!(merge.record, local);
    }
}
