//! Core data models for the exercise engine.
//!
//! This crate defines the domain types shared by the execution client,
//! sync queue, reconciler and session coordinator.

#![warn(missing_docs)]

// Identities
mod id;

// Catalog
mod exercise;

// Submission lifecycle
mod submission;

// Durable progress state
mod operation;
mod progress;

// Policy and configuration
mod config;
mod error;

pub use id::{ExerciseId, OperationId, SubmissionId};

pub use exercise::{Catalog, Difficulty, Exercise};

pub use submission::{Submission, SubmissionStatus};

pub use operation::{OperationKind, QueuedOperation};
pub use progress::{BestStatus, ProgressRecord};

pub use config::{EngineConfig, RetryPolicy};
pub use error::EngineError;

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
