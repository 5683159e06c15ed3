//! Reports returned by the orchestrator.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::storage::{EvictionReport, StorageSnapshot};
use crate::store::StateCounts;

/// Time spent per stage for one item
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageTimings {
    pub fetch_ms: Option<u64>,
    pub transform_ms: Option<u64>,
    pub total_ms: u64,
}

/// Outcome of processing one item
#[derive(Debug, Clone, Serialize)]
pub struct ItemOutcome {
    pub item_id: String,
    pub title: String,
    pub success: bool,
    pub timings: StageTimings,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,

    /// Payload size as fetched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_bytes: Option<u64>,

    /// Evictions run on behalf of this item
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub evictions: Vec<EvictionReport>,
}

impl ItemOutcome {
    pub(crate) fn new(item_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            title: title.into(),
            success: false,
            timings: StageTimings::default(),
            error: None,
            error_kind: None,
            language: None,
            confidence: None,
            output_path: None,
            payload_bytes: None,
            evictions: Vec::new(),
        }
    }

    pub(crate) fn failed(mut self, kind: &str, error: impl Into<String>) -> Self {
        self.success = false;
        self.error_kind = Some(kind.to_string());
        self.error = Some(error.into());
        self
    }
}

/// Latest error for an item that failed in a batch
#[derive(Debug, Clone, Serialize)]
pub struct ItemError {
    pub item_id: String,
    pub kind: String,
    pub error: String,
}

/// Outcome of a sequential batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub outcomes: Vec<ItemOutcome>,

    /// Proactive evictions (before the batch and per item)
    pub evictions: Vec<EvictionReport>,
    pub elapsed_ms: u64,
}

impl BatchReport {
    pub(crate) fn record(&mut self, outcome: ItemOutcome) {
        self.total += 1;
        if outcome.success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.evictions.extend(outcome.evictions.iter().cloned());
        self.outcomes.push(outcome);
    }

    pub fn errors(&self) -> Vec<ItemError> {
        self.outcomes
            .iter()
            .filter(|o| !o.success)
            .map(|o| ItemError {
                item_id: o.item_id.clone(),
                kind: o.error_kind.clone().unwrap_or_default(),
                error: o.error.clone().unwrap_or_default(),
            })
            .collect()
    }
}

/// Outcome of one discovery + processing cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,

    /// Newly stored items (re-discoveries excluded)
    pub discovered: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<ItemError>,
    pub evictions: Vec<EvictionReport>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_error: Option<String>,

    /// Storage after the cycle
    pub snapshot: StorageSnapshot,
    pub elapsed_ms: u64,
}

impl CycleReport {
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}

/// Result of running continuous mode until cancelled
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContinuousSummary {
    pub cycles_run: usize,
    pub failed_cycles: usize,
    /// Items found mid-flight at start-up and failed
    pub recovered: usize,
}

/// Overall pipeline state for `status`
#[derive(Debug, Clone)]
pub struct PipelineStatus {
    pub counts: StateCounts,
    pub snapshot: StorageSnapshot,
    pub retriever: String,
    pub providers: Vec<String>,
    pub threshold_bytes: u64,
}
