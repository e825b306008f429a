//! Offline sync queue.
//!
//! Buffers progress mutations that could not be confirmed by the server
//! and replays them in creation order per exercise once connectivity
//! returns.

mod api;
mod connectivity;
mod queue;

pub use api::{ApiError, HttpProgressApi, ProgressApi};
pub use connectivity::{spawn_probe, Connectivity};
pub use queue::{DrainOutcome, SyncQueue};
