//! HTTP executor implementation over the backend execution service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ExecuteError, ExecutionRequest, ExecutionVerdict, Executor};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    exercise_id: &'a str,
    code: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    status: String,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    execution_time_ms: u64,
}

/// Executor talking to the real backend over HTTP.
pub struct HttpExecutor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExecutor {
    /// Create an executor against `base_url` (e.g. `https://api.example.dev`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/execute", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionVerdict, ExecuteError> {
        let body = WireRequest {
            exercise_id: request.exercise_id.as_str(),
            code: &request.code,
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| ExecuteError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(ExecuteError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        if !status.is_success() {
            return Err(ExecuteError::Transient(format!(
                "executor returned {}",
                status
            )));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| ExecuteError::Transient(e.to_string()))?;

        debug!(
            exercise = %request.exercise_id,
            status = %wire.status,
            time_ms = wire.execution_time_ms,
            "executor verdict received"
        );

        Ok(ExecutionVerdict {
            passed: wire.status == "passed",
            output: wire.output.or(wire.error).unwrap_or_default(),
            execution_time_ms: wire.execution_time_ms,
        })
    }
}
