//! Session coordination.
//!
//! The façade the UI calls: owns current exercise and run state,
//! orchestrates the execution client, reconciler and sync queue, and
//! exposes state transitions as an observable snapshot channel.

mod coordinator;
mod state;

pub use coordinator::SessionCoordinator;
pub use state::{RunState, SessionSnapshot};
