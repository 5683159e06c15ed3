//! JSONL manifest discovery.
//!
//! Each non-empty line of the manifest is one item:
//!
//! ```json
//! {"external_id": "dQw4w9WgXcQ", "title": "...", "source_url": "https://...",
//!  "collection_id": "UC...", "collection_name": "Some Channel", "duration_seconds": 212}
//! ```
//!
//! Lines starting with `#` are comments. A malformed line is skipped with a
//! warning; it does not hide the rest of the manifest.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{DiscoveryError, DiscoverySource};
use crate::domain::NewItem;

/// Reads items from a JSONL manifest file
#[derive(Debug, Clone)]
pub struct ManifestDiscovery {
    path: PathBuf,
}

impl ManifestDiscovery {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse_line(&self, line_no: usize, line: &str) -> Result<NewItem, DiscoveryError> {
        let invalid = |reason: String| DiscoveryError::InvalidEntry {
            location: format!("{}:{}", self.path.display(), line_no),
            reason,
        };

        let mut item: NewItem = serde_json::from_str(line).map_err(|e| invalid(e.to_string()))?;

        if item.external_id.trim().is_empty() {
            return Err(invalid("empty external_id".to_string()));
        }
        if item.source_url.trim().is_empty() {
            return Err(invalid("empty source_url".to_string()));
        }
        if item.collection_name.trim().is_empty() {
            item.collection_name = item.collection_id.clone();
        }

        Ok(item)
    }
}

#[async_trait]
impl DiscoverySource for ManifestDiscovery {
    fn name(&self) -> &str {
        "manifest"
    }

    async fn discover_new_items(&self) -> Result<Vec<NewItem>, DiscoveryError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DiscoveryError::Unavailable(format!(
                    "manifest not found: {}",
                    self.path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let mut items = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match self.parse_line(index + 1, line) {
                Ok(item) => items.push(item),
                Err(e) => warn!(error = %e, "Skipping manifest entry"),
            }
        }

        debug!(path = %self.path.display(), count = items.len(), "Manifest read");
        Ok(items)
    }
}
