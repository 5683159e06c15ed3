//! Durable item store.
//!
//! The store is the single owner of work item records. Only the orchestrator
//! calls [`ItemStore::transition`]; stages report back to it instead.

pub mod items;

pub use items::{ItemStore, PutOutcome, StateCounts, StoreError, TransitionUpdate};
