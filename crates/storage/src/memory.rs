//! In-memory store backend.
//!
//! Used by tests and by guest sessions that have no durable storage
//! grant. Honors the same retention semantics as the JSON backend.

use std::collections::HashMap;

use drill_core::{ExerciseId, ProgressRecord, QueuedOperation, Submission};

use super::{Result, Store};

/// Volatile store keeping everything in process memory.
#[derive(Default)]
pub struct MemoryStore {
    records: HashMap<ExerciseId, ProgressRecord>,
    submissions: HashMap<ExerciseId, Vec<Submission>>,
    queue: Vec<QueuedOperation>,
    history_cap: usize,
}

impl MemoryStore {
    /// Create an empty store with the given submission retention cap.
    pub fn new(history_cap: usize) -> Self {
        Self {
            history_cap,
            ..Self::default()
        }
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn save_record(&mut self, record: &ProgressRecord) -> Result<()> {
        self.records
            .insert(record.exercise_id.clone(), record.clone());
        Ok(())
    }

    async fn load_record(&self, id: &ExerciseId) -> Result<Option<ProgressRecord>> {
        Ok(self.records.get(id).cloned())
    }

    async fn list_records(&self) -> Result<Vec<ProgressRecord>> {
        Ok(self.records.values().cloned().collect())
    }

    async fn save_submission(&mut self, submission: &Submission) -> Result<()> {
        let history = self
            .submissions
            .entry(submission.exercise_id.clone())
            .or_default();
        history.retain(|s| s.id != submission.id);
        history.push(submission.clone());
        history.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        history.truncate(self.history_cap);
        Ok(())
    }

    async fn list_submissions(&self, id: &ExerciseId) -> Result<Vec<Submission>> {
        Ok(self.submissions.get(id).cloned().unwrap_or_default())
    }

    async fn save_queue(&mut self, ops: &[QueuedOperation]) -> Result<()> {
        self.queue = ops.to_vec();
        Ok(())
    }

    async fn load_queue(&self) -> Result<Vec<QueuedOperation>> {
        Ok(self.queue.clone())
    }
}
