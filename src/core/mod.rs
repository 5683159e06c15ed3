//! Core orchestration logic.
//!
//! This module contains:
//! - Journal: Append-only event logging
//! - Orchestrator: Per-item state machine, batches, cycles, continuous mode
//! - Report: Outcomes returned to callers

pub mod journal;
pub mod orchestrator;
pub mod report;

// Re-export commonly used types
pub use journal::{Journal, JournalError};
pub use orchestrator::{Orchestrator, PipelineError};
pub use report::{
    BatchReport, ContinuousSummary, CycleReport, ItemError, ItemOutcome, PipelineStatus,
    StageTimings,
};
