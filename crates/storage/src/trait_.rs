//! Store trait abstraction.

use async_trait::async_trait;
use drill_core::{EngineError, ExerciseId, ProgressRecord, QueuedOperation, Submission};

/// Error type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Storage(e.to_string())
    }
}

/// Durable store for engine state.
///
/// Implementations must guarantee that each write lands completely or not
/// at all, so the UI never observes state that would not survive a reload.
#[async_trait]
pub trait Store: Send + Sync {
    // === Progress records ===

    /// Save a progress record (create or update).
    async fn save_record(&mut self, record: &ProgressRecord) -> Result<()>;

    /// Load the progress record for an exercise.
    async fn load_record(&self, id: &ExerciseId) -> Result<Option<ProgressRecord>>;

    /// List all progress records.
    async fn list_records(&self) -> Result<Vec<ProgressRecord>>;

    // === Submission history ===

    /// Save a submission, evicting history beyond the retention cap.
    async fn save_submission(&mut self, submission: &Submission) -> Result<()>;

    /// List submissions for an exercise, newest sequence first.
    async fn list_submissions(&self, id: &ExerciseId) -> Result<Vec<Submission>>;

    // === Pending-operation queue ===

    /// Persist the full pending-operation snapshot.
    async fn save_queue(&mut self, ops: &[QueuedOperation]) -> Result<()>;

    /// Load the pending-operation snapshot, creation order preserved.
    async fn load_queue(&self) -> Result<Vec<QueuedOperation>>;
}
