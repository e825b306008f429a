//! Deferred progress mutations awaiting server confirmation.

use serde::{Deserialize, Serialize};

use crate::id::{ExerciseId, OperationId};
use crate::progress::BestStatus;
use crate::Time;

/// The idempotent mutation a queued operation carries.
///
/// Every kind names the record version it produces, so the server (and a
/// replaying client) can detect duplicates: a record already at or beyond
/// `version` means the operation was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    /// "Mark exercise E's best status as S at version V"
    MarkStatus {
        /// Status the record should carry
        status: BestStatus,
        /// Resulting record version
        version: u64,
    },

    /// "Set exercise E's bookmark flag at version V"
    SetBookmark {
        /// Flag value
        on: bool,
        /// Resulting record version
        version: u64,
    },
}

impl OperationKind {
    /// The record version this operation produces when applied.
    pub fn target_version(&self) -> u64 {
        match self {
            Self::MarkStatus { version, .. } => *version,
            Self::SetBookmark { version, .. } => *version,
        }
    }

    /// Whether the operation carries progress the user would miss.
    ///
    /// Under queue overflow, non-essential operations (bookmark toggles)
    /// are evicted before status mutations.
    pub fn is_essential(&self) -> bool {
        matches!(self, Self::MarkStatus { .. })
    }
}

/// A progress mutation buffered until the server confirms it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique operation id, the server's idempotency key
    pub id: OperationId,

    /// Exercise the mutation targets
    pub exercise_id: ExerciseId,

    /// The mutation itself
    pub kind: OperationKind,

    /// When the operation was queued
    pub created_at: Time,

    /// Delivery attempts so far
    pub attempts: u32,
}

impl QueuedOperation {
    /// Create a fresh, undelivered operation.
    pub fn new(exercise_id: ExerciseId, kind: OperationKind) -> Self {
        Self {
            id: OperationId::new(),
            exercise_id,
            kind,
            created_at: chrono::Utc::now(),
            attempts: 0,
        }
    }
}
