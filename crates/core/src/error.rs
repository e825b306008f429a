//! Engine error taxonomy.
//!
//! Terminal errors surface to the UI through observable session state;
//! nothing here is expected to cross the engine boundary as a panic.

use crate::id::{ExerciseId, OperationId};

/// Errors the engine reports across component boundaries.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Bad input; never retried, surfaced immediately
    #[error("invalid input: {0}")]
    Validation(String),

    /// Network-level failure, retried per policy before surfacing
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    /// 4xx-class rejection; terminal, never retried
    #[error("server rejected request ({status}): {message}")]
    ServerRejection {
        /// HTTP status code
        status: u16,
        /// Server-provided detail
        message: String,
    },

    /// Local and server records disagree at the same version
    #[error("conflicting progress record for {exercise_id} at version {version}")]
    ConflictInconsistency {
        /// Exercise whose record conflicts
        exercise_id: ExerciseId,
        /// The tied version
        version: u64,
    },

    /// Pending-operation cap exceeded; the named operation was dropped
    #[error("sync queue overflow, dropped operation {dropped}")]
    QueueOverflow {
        /// Operation evicted to make room
        dropped: OperationId,
    },

    /// Local store failure
    #[error("storage error: {0}")]
    Storage(String),
}
