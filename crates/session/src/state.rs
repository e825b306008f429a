//! Observable session state.

use drill_core::{Exercise, ProgressRecord, Submission, SubmissionStatus};

/// Per-exercise run state machine.
///
/// Idle -> Running -> terminal -> Idle. A new run while Running
/// supersedes the in-flight one (cooperative cancellation); the stale
/// response is fenced at the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No run in flight
    Idle,
    /// A submission is being executed
    Running,
    /// The last run reached a terminal status
    Finished(SubmissionStatus),
}

/// Immutable snapshot of session state, published on every transition.
///
/// Everything here has already been persisted: the UI never observes
/// state that would not survive a reload.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Currently selected exercise
    pub exercise: Option<Exercise>,

    /// Run state for the selected exercise
    pub run_state: RunState,

    /// Most recent terminal submission for the selected exercise
    pub last_submission: Option<Submission>,

    /// Progress record for the selected exercise
    pub record: Option<ProgressRecord>,

    /// Connectivity state
    pub online: bool,

    /// Operations still awaiting server confirmation
    pub pending_ops: usize,

    /// Set when the sync queue dropped an operation under overflow
    pub queue_warning: bool,

    /// Last terminal error, surfaced as state rather than thrown
    pub last_error: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            exercise: None,
            run_state: RunState::Idle,
            last_submission: None,
            record: None,
            online: false,
            pending_ops: 0,
            queue_warning: false,
            last_error: None,
        }
    }
}
