//! Submission dispatch with timeout, retry and cancellation.

use std::collections::HashMap;
use std::time::Duration;

use drill_core::{
    EngineError, ExerciseId, RetryPolicy, Submission, SubmissionStatus,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{CancelToken, ExecuteError, ExecutionRequest, Executor};

/// How a dispatched submission ended.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// The run reached a terminal status
    Completed(Submission),
    /// The run was superseded before completing; no result to apply
    Cancelled,
}

/// Client wrapping an [`Executor`] with sequence numbers, per-attempt
/// timeout and the retry policy.
pub struct ExecutionClient<E: Executor> {
    executor: E,
    policy: RetryPolicy,
    timeout: Duration,
    sequences: Mutex<HashMap<ExerciseId, u64>>,
}

impl<E: Executor> ExecutionClient<E> {
    /// Create a client with the given policy and per-attempt timeout.
    pub fn new(executor: E, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            executor,
            policy,
            timeout,
            sequences: Mutex::new(HashMap::new()),
        }
    }

    /// Seed per-exercise sequence counters from persisted history so
    /// numbers stay strictly increasing across a restart.
    pub async fn seed_sequences(&self, floors: HashMap<ExerciseId, u64>) {
        let mut sequences = self.sequences.lock().await;
        for (exercise_id, floor) in floors {
            let entry = sequences.entry(exercise_id).or_insert(0);
            if floor > *entry {
                *entry = floor;
            }
        }
    }

    async fn next_sequence(&self, exercise_id: &ExerciseId) -> u64 {
        let mut sequences = self.sequences.lock().await;
        let entry = sequences.entry(exercise_id.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Dispatch one submission and drive it to a terminal status.
    ///
    /// Transient failures and per-attempt timeouts are retried with
    /// backoff; a 4xx rejection is terminal immediately. Only validation
    /// problems surface as `Err` - everything else is a completed
    /// submission carrying its status.
    pub async fn submit(
        &self,
        exercise_id: &ExerciseId,
        code: &str,
        cancel: &CancelToken,
    ) -> Result<SubmitOutcome, EngineError> {
        if code.trim().is_empty() {
            return Err(EngineError::Validation(
                "submitted code is empty".to_string(),
            ));
        }

        let sequence = self.next_sequence(exercise_id).await;
        let mut submission = Submission::new(exercise_id.clone(), code, sequence);
        submission.status = SubmissionStatus::Running;

        let request = ExecutionRequest {
            exercise_id: exercise_id.clone(),
            code: code.to_string(),
        };

        let mut attempt = 0u32;
        let mut last_failure = String::new();
        loop {
            let attempt_result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(exercise = %exercise_id, sequence, "submission cancelled in flight");
                    return Ok(SubmitOutcome::Cancelled);
                }
                r = tokio::time::timeout(self.timeout, self.executor.run(&request)) => r,
            };

            match attempt_result {
                Ok(Ok(verdict)) => {
                    submission.status = if verdict.passed {
                        SubmissionStatus::Succeeded
                    } else {
                        SubmissionStatus::Failed
                    };
                    submission.output = Some(verdict.output);
                    return Ok(SubmitOutcome::Completed(submission));
                }
                Ok(Err(ExecuteError::Rejected { status, message })) => {
                    warn!(exercise = %exercise_id, status, "executor rejected submission");
                    submission.status = SubmissionStatus::Failed;
                    submission.output = Some(format!("rejected ({}): {}", status, message));
                    return Ok(SubmitOutcome::Completed(submission));
                }
                Ok(Err(ExecuteError::Transient(reason))) => {
                    debug!(exercise = %exercise_id, attempt, %reason, "transient executor failure");
                    last_failure = reason;
                }
                Err(_) => {
                    debug!(exercise = %exercise_id, attempt, "execution attempt timed out");
                    last_failure = format!("no response within {:?}", self.timeout);
                }
            }

            if !self.policy.should_retry(attempt) {
                submission.status = SubmissionStatus::TimedOut;
                submission.output = Some(last_failure);
                return Ok(SubmitOutcome::Completed(submission));
            }

            let delay = self.policy.delay_for(attempt);
            attempt += 1;
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(exercise = %exercise_id, sequence, "submission cancelled during backoff");
                    return Ok(SubmitOutcome::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
