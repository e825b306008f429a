//! Per-exercise progress aggregate.

use serde::{Deserialize, Serialize};

use crate::id::ExerciseId;
use crate::submission::SubmissionStatus;
use crate::Time;

/// Best result achieved for an exercise, under a total order.
///
/// The ordering is the merge rule: a record's status only moves up
/// `NotAttempted < Failed < Succeeded`, never down.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum BestStatus {
    /// No terminal submission yet
    NotAttempted,
    /// Attempted, best outcome so far did not pass
    Failed,
    /// Passed at least once
    Succeeded,
}

impl BestStatus {
    /// Map a terminal submission status to its progress contribution.
    ///
    /// Non-terminal statuses contribute nothing. A timeout counts as a
    /// failed attempt for progress purposes.
    pub fn from_terminal(status: SubmissionStatus) -> Option<Self> {
        match status {
            SubmissionStatus::Succeeded => Some(Self::Succeeded),
            SubmissionStatus::Failed | SubmissionStatus::TimedOut => Some(Self::Failed),
            SubmissionStatus::Pending | SubmissionStatus::Running => None,
        }
    }
}

impl std::fmt::Display for BestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAttempted => write!(f, "not-attempted"),
            Self::Failed => write!(f, "failed"),
            Self::Succeeded => write!(f, "succeeded"),
        }
    }
}

/// Durable per-exercise summary of a user's attempts.
///
/// Created lazily on first attempt, never deleted. Every accepted
/// mutation bumps `version` by exactly 1; two mutations producing the
/// same version are idempotent duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Exercise this record summarizes
    pub exercise_id: ExerciseId,

    /// Best status achieved
    pub best: BestStatus,

    /// Total terminal attempts
    pub attempts: u32,

    /// Timestamp of the latest attempt
    pub last_attempt_at: Option<Time>,

    /// User bookmark flag
    pub bookmarked: bool,

    /// Monotonic version counter used for conflict resolution
    pub version: u64,
}

impl ProgressRecord {
    /// Fresh record for an exercise with no attempts.
    pub fn new(exercise_id: ExerciseId) -> Self {
        Self {
            exercise_id,
            best: BestStatus::NotAttempted,
            attempts: 0,
            last_attempt_at: None,
            bookmarked: false,
            version: 0,
        }
    }

    /// Record a terminal attempt.
    ///
    /// The attempt counter always increments; `best` only improves. Bumps
    /// the version by 1.
    pub fn note_attempt(&mut self, outcome: BestStatus, at: Time) {
        self.attempts += 1;
        self.last_attempt_at = Some(at);
        if outcome > self.best {
            self.best = outcome;
        }
        self.version += 1;
    }

    /// Set or clear the bookmark flag. Bumps the version by 1.
    pub fn set_bookmark(&mut self, on: bool) {
        self.bookmarked = on;
        self.version += 1;
    }

    /// Compare everything except the version counter.
    ///
    /// Used to detect the equal-version/different-content inconsistency
    /// between a local and a server copy.
    pub fn same_content(&self, other: &Self) -> bool {
        self.exercise_id == other.exercise_id
            && self.best == other.best
            && self.attempts == other.attempts
            && self.bookmarked == other.bookmarked
    }
}
