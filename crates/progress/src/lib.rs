//! Progress reconciliation.
//!
//! Merges terminal submission outcomes and server-reported records into
//! the durable per-exercise progress state, deterministically.

mod reconciler;

pub use reconciler::{Reconciler, ServerMerge};
