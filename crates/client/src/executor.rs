//! Remote executor seam.

use async_trait::async_trait;
use drill_core::ExerciseId;

/// Payload sent to the executor endpoint.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Exercise being attempted
    pub exercise_id: ExerciseId,
    /// Submitted code
    pub code: String,
}

/// Normalized executor verdict.
#[derive(Debug, Clone)]
pub struct ExecutionVerdict {
    /// Whether the run matched the expected output
    pub passed: bool,
    /// Program output or error text
    pub output: String,
    /// Server-reported execution time
    pub execution_time_ms: u64,
}

/// Errors from one execution attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecuteError {
    /// Transport-level failure; eligible for retry
    #[error("transient failure: {0}")]
    Transient(String),

    /// 4xx rejection (e.g. malformed payload); terminal
    #[error("rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Server-provided detail
        message: String,
    },
}

/// The remote service that runs submitted code.
///
/// The engine treats execution as opaque beyond the verdict; the trait
/// exists so tests can script outcomes without a network.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run the submission once and return the verdict.
    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionVerdict, ExecuteError>;
}
