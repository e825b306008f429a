//! Submission model - one "run" of user code against an exercise.

use serde::{Deserialize, Serialize};

use crate::id::{ExerciseId, SubmissionId};
use crate::Time;

/// Lifecycle status of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionStatus {
    /// Created, not yet dispatched
    Pending,
    /// Request in flight to the executor
    Running,
    /// Executor confirmed the expected output
    Succeeded,
    /// Executor ran the code and it did not pass
    Failed,
    /// No usable response within the timeout budget
    TimedOut,
}

impl SubmissionStatus {
    /// Whether this status ends the submission lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed-out"),
        }
    }
}

/// A single code submission for an exercise.
///
/// Created by the session coordinator on "run"; mutated only by the
/// execution client while in flight. The per-exercise `sequence` fences
/// stale results: the reconciler never applies a submission whose
/// sequence is below the last applied one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    /// Unique identifier
    pub id: SubmissionId,

    /// Exercise this submission targets
    pub exercise_id: ExerciseId,

    /// Submitted source text
    pub code: String,

    /// Client-generated sequence number, strictly increasing per exercise
    pub sequence: u64,

    /// When the run was requested
    pub submitted_at: Time,

    /// Current status
    pub status: SubmissionStatus,

    /// Executor output or error text, once terminal
    pub output: Option<String>,
}

impl Submission {
    /// Create a pending submission.
    pub fn new(exercise_id: ExerciseId, code: impl Into<String>, sequence: u64) -> Self {
        Self {
            id: SubmissionId::new(),
            exercise_id,
            code: code.into(),
            sequence,
            submitted_at: chrono::Utc::now(),
            status: SubmissionStatus::Pending,
            output: None,
        }
    }
}
