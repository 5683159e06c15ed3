//! Pipeline journal events.
//!
//! Every state change the orchestrator makes is also recorded as an immutable
//! event in an append-only log, so the history of an item (or a cycle) can be
//! audited after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single entry in the append-only pipeline journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The cycle this event belongs to (if any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_id: Option<Uuid>,

    /// External id of the item (if applicable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,

    /// Type of event
    pub event_type: EventType,

    /// Human-readable summary (NO secrets)
    pub summary: String,

    /// Time taken in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Bytes involved (payload size, bytes freed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,

    /// Error message if failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineEvent {
    /// Create a new event with the current timestamp
    pub fn new(event_type: EventType, summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            cycle_id: None,
            item_id: None,
            event_type,
            summary: summary.into(),
            duration_ms: None,
            bytes: None,
            error: None,
        }
    }

    pub fn for_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    pub fn in_cycle(mut self, cycle_id: Option<Uuid>) -> Self {
        self.cycle_id = cycle_id;
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = Some(bytes);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Types of events recorded by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CycleStarted,
    CycleCompleted,

    /// Discovery failed; the cycle continued with existing items
    DiscoveryFailed,

    ItemDiscovered,
    ItemFetched,
    ItemCompleted,
    ItemFailed,

    /// Operator moved a failed item back to pending
    ItemRequeued,

    /// Item found stuck mid-flight after a crash
    ItemInterrupted,

    Eviction,
    EmergencyCleanup,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let cycle = Uuid::new_v4();
        let event = PipelineEvent::new(EventType::ItemFetched, "Fetched abc")
            .for_item("abc")
            .in_cycle(Some(cycle))
            .with_bytes(1024);

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"item_fetched\""));
        assert!(!json.contains("\"error\""));

        let parsed: PipelineEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type, EventType::ItemFetched);
        assert_eq!(parsed.item_id.as_deref(), Some("abc"));
        assert_eq!(parsed.cycle_id, Some(cycle));
        assert_eq!(parsed.bytes, Some(1024));
    }

    #[test]
    fn test_event_with_error() {
        let event = PipelineEvent::new(EventType::ItemFailed, "Failed abc")
            .with_duration(1500)
            .with_error("Connection timeout");

        assert_eq!(event.duration_ms, Some(1500));
        assert_eq!(event.error.as_deref(), Some("Connection timeout"));
    }
}
