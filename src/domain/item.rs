//! Work items and their lifecycle state.
//!
//! A work item is one discovered media entry. Its state only ever moves
//! forward through the pipeline; the single backwards edge (`Failed → Pending`)
//! is an explicit operator action, never automatic.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Discovered, waiting to be fetched
    Pending,

    /// Payload retrieval in progress
    Fetching,

    /// Payload is on local disk
    Fetched,

    /// Transcription in progress
    Transforming,

    /// Transcript persisted, payload cleaned up
    Completed,

    /// Terminal failure (requires explicit requeue)
    Failed,
}

impl ItemState {
    /// All states, in pipeline order
    pub const ALL: [ItemState; 6] = [
        ItemState::Pending,
        ItemState::Fetching,
        ItemState::Fetched,
        ItemState::Transforming,
        ItemState::Completed,
        ItemState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Fetched => "fetched",
            Self::Transforming => "transforming",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether the pipeline may move an item from `self` to `next`.
    ///
    /// `Failed → Pending` is deliberately absent: see [`ItemState::can_requeue`].
    pub fn can_transition_to(&self, next: ItemState) -> bool {
        use ItemState::*;
        matches!(
            (self, next),
            (Pending, Fetching)
                | (Fetching, Fetched)
                | (Fetching, Failed)
                | (Fetched, Transforming)
                | (Fetched, Failed)
                | (Transforming, Completed)
                | (Transforming, Failed)
        )
    }

    /// Only failed items can be put back in the queue
    pub fn can_requeue(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// States a crashed process can leave behind mid-flight
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Fetching | Self::Fetched | Self::Transforming)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "fetching" => Ok(Self::Fetching),
            "fetched" => Ok(Self::Fetched),
            "transforming" => Ok(Self::Transforming),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown item state: {}", other)),
        }
    }
}

/// An item as reported by a discovery source, before it is stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    /// Stable id from the source (e.g. a video id)
    pub external_id: String,

    pub title: String,

    pub source_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,

    /// Source collection (channel/feed) id
    pub collection_id: String,

    /// Human-readable collection name, used for directory layout
    #[serde(default)]
    pub collection_name: String,
}

impl NewItem {
    pub fn new(
        external_id: impl Into<String>,
        title: impl Into<String>,
        source_url: impl Into<String>,
        collection_id: impl Into<String>,
    ) -> Self {
        let collection_id = collection_id.into();
        Self {
            external_id: external_id.into(),
            title: title.into(),
            source_url: source_url.into(),
            duration_seconds: None,
            collection_name: collection_id.clone(),
            collection_id,
        }
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    pub fn with_collection_name(mut self, name: impl Into<String>) -> Self {
        self.collection_name = name.into();
        self
    }
}

/// A stored work item with its current lifecycle state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub external_id: String,
    pub collection_id: String,
    pub collection_name: String,
    pub title: String,
    pub source_url: String,
    pub duration_seconds: Option<u64>,

    pub state: ItemState,

    /// Local payload file (only while `Fetched`/`Transforming`)
    pub payload_path: Option<PathBuf>,

    /// Persisted transcript artifact (once `Completed`)
    pub output_path: Option<PathBuf>,

    pub discovered_at: DateTime<Utc>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,

    /// Last error message (if failed)
    pub error: Option<String>,

    /// Machine-readable failure class (e.g. `too_large`)
    pub error_kind: Option<String>,

    /// Incremented every time the item enters `Failed`
    pub retry_count: u32,
}

impl WorkItem {
    /// Directory name for this item's collection
    pub fn collection_label(&self) -> &str {
        if self.collection_name.trim().is_empty() {
            &self.collection_id
        } else {
            &self.collection_name
        }
    }

    /// Declared duration formatted as `M:SS`
    pub fn duration_label(&self) -> String {
        match self.duration_seconds {
            Some(secs) => format!("{}:{:02}", secs / 60, secs % 60),
            None => "?".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(ItemState::Pending.can_transition_to(ItemState::Fetching));
        assert!(ItemState::Fetching.can_transition_to(ItemState::Fetched));
        assert!(ItemState::Fetched.can_transition_to(ItemState::Transforming));
        assert!(ItemState::Transforming.can_transition_to(ItemState::Completed));
    }

    #[test]
    fn test_no_silent_retry_or_skips() {
        assert!(!ItemState::Failed.can_transition_to(ItemState::Pending));
        assert!(!ItemState::Pending.can_transition_to(ItemState::Completed));
        assert!(!ItemState::Completed.can_transition_to(ItemState::Pending));
        assert!(!ItemState::Pending.can_transition_to(ItemState::Failed));
        assert!(ItemState::Failed.can_requeue());
        assert!(!ItemState::Completed.can_requeue());
    }

    #[test]
    fn test_transient_states() {
        let transient: Vec<ItemState> = ItemState::ALL
            .into_iter()
            .filter(|s| s.is_transient())
            .collect();
        assert_eq!(
            transient,
            vec![ItemState::Fetching, ItemState::Fetched, ItemState::Transforming]
        );
    }

    #[test]
    fn test_state_round_trip_through_str() {
        for state in ItemState::ALL {
            assert_eq!(state.as_str().parse::<ItemState>().unwrap(), state);
        }
        assert!("downloading".parse::<ItemState>().is_err());
    }

    #[test]
    fn test_new_item_defaults_collection_name() {
        let item = NewItem::new("abc", "Title", "https://example.com/abc", "chan-1");
        assert_eq!(item.collection_name, "chan-1");

        let item = item.with_collection_name("My Channel").with_duration(300);
        assert_eq!(item.collection_name, "My Channel");
        assert_eq!(item.duration_seconds, Some(300));
    }
}
