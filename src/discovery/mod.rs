//! Discovery sources.
//!
//! Feed parsing and channel resolution happen upstream; a discovery source
//! only hands the pipeline already-resolved items. Reporting an item that is
//! already known is fine: the item store ignores duplicates.

pub mod manifest;

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::NewItem;

pub use manifest::ManifestDiscovery;

/// Errors raised by a discovery source. Never fatal to a cycle.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Discovery source unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid entry at {location}: {reason}")]
    InvalidEntry { location: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for discovery sources
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Human-readable source name
    fn name(&self) -> &str;

    /// Items currently offered by the source
    async fn discover_new_items(&self) -> Result<Vec<NewItem>, DiscoveryError>;
}

/// In-memory source for embedding and tests
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    items: Mutex<Vec<NewItem>>,
}

impl StaticDiscovery {
    pub fn new(items: Vec<NewItem>) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }

    /// Offer another item on the next discovery
    pub fn push(&self, item: NewItem) {
        if let Ok(mut items) = self.items.lock() {
            items.push(item);
        }
    }
}

#[async_trait]
impl DiscoverySource for StaticDiscovery {
    fn name(&self) -> &str {
        "static"
    }

    async fn discover_new_items(&self) -> Result<Vec<NewItem>, DiscoveryError> {
        self.items
            .lock()
            .map(|items| items.clone())
            .map_err(|_| DiscoveryError::Unavailable("item list lock poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_discovery() {
        let source = StaticDiscovery::new(vec![NewItem::new("a", "A", "https://x/a", "chan")]);
        source.push(NewItem::new("b", "B", "https://x/b", "chan"));

        let items = source.discover_new_items().await.unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.external_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
