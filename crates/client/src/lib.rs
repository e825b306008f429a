//! Execution client.
//!
//! Sends code submissions to the remote executor, applies the
//! timeout/retry policy and normalizes results into terminal
//! [`drill_core::Submission`]s.

mod cancel;
mod client;
mod executor;
mod http;

pub use cancel::CancelToken;
pub use client::{ExecutionClient, SubmitOutcome};
pub use executor::{ExecuteError, ExecutionRequest, ExecutionVerdict, Executor};
pub use http::HttpExecutor;
