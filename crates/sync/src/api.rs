//! Progress endpoint seam.

use async_trait::async_trait;
use drill_core::{ExerciseId, ProgressRecord, QueuedOperation};
use tracing::debug;

/// Errors from the progress endpoint.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// Transport-level failure; eligible for retry
    #[error("transient failure: {0}")]
    Transient(String),

    /// 4xx rejection; not retried
    #[error("rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Server-provided detail
        message: String,
    },
}

/// The backend progress service.
///
/// Operations are idempotent and keyed by operation id: replaying one the
/// server has already applied returns the current record unchanged.
#[async_trait]
pub trait ProgressApi: Send + Sync {
    /// Deliver one mutation; returns the authoritative record.
    async fn apply(&self, op: &QueuedOperation) -> Result<ProgressRecord, ApiError>;

    /// Fetch the authoritative record for an exercise, if any.
    async fn fetch(&self, id: &ExerciseId) -> Result<Option<ProgressRecord>, ApiError>;

    /// Lightweight reachability check for the health probe.
    async fn ping(&self) -> bool;
}

/// Progress API over HTTP.
pub struct HttpProgressApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProgressApi {
    /// Create a client against `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ProgressApi for HttpProgressApi {
    async fn apply(&self, op: &QueuedOperation) -> Result<ProgressRecord, ApiError> {
        let response = self
            .client
            .post(self.url("progress/operations"))
            .json(op)
            .send()
            .await
            .map_err(|e| ApiError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        if !status.is_success() {
            return Err(ApiError::Transient(format!("progress endpoint {}", status)));
        }

        let record: ProgressRecord = response
            .json()
            .await
            .map_err(|e| ApiError::Transient(e.to_string()))?;

        debug!(
            operation = %op.id,
            exercise = %op.exercise_id,
            version = record.version,
            "operation confirmed by server"
        );
        Ok(record)
    }

    async fn fetch(&self, id: &ExerciseId) -> Result<Option<ProgressRecord>, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("progress/{}", id)))
            .send()
            .await
            .map_err(|e| ApiError::Transient(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status.is_client_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        if !status.is_success() {
            return Err(ApiError::Transient(format!("progress endpoint {}", status)));
        }

        response
            .json()
            .await
            .map(Some)
            .map_err(|e| ApiError::Transient(e.to_string()))
    }

    async fn ping(&self) -> bool {
        match self.client.get(self.url("health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
