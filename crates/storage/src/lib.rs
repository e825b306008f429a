//! Durable local persistence for exercise progress.
//!
//! The store is the single shared mutable resource in the engine: progress
//! records, submission history and the pending-operation queue all funnel
//! through it, and every write is all-or-nothing per record.

mod json_store;
mod memory;
mod trait_;

pub use json_store::JsonStore;
pub use memory::MemoryStore;
pub use trait_::{Result, Store, StoreError};
