//! Fetch stage: payload retrieval under size, duration, and time caps.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::PayloadRetriever;
use crate::config::paths;
use crate::config::ResolvedConfig;
use crate::domain::{ItemState, WorkItem};

/// Errors that can occur while fetching one item.
///
/// All of them are terminal for the item; none abort a batch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("Duration {seconds}s exceeds limit of {limit}s")]
    DurationExceeded { seconds: u64, limit: u64 },

    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Item is {state}, expected fetching")]
    NotReady { state: ItemState },
}

impl FetchError {
    /// Stable error kind recorded on the failed item
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TooLarge { .. } | Self::DurationExceeded { .. } => "too_large",
            Self::Timeout(_) => "timeout",
            Self::Retrieval(_) => "retrieval",
            Self::Io(_) => "io",
            Self::NotReady { .. } => "invalid_state",
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// A payload on local disk
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub payload_path: PathBuf,
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Retrieves payloads into the temp root
pub struct FetchStage {
    retriever: Arc<dyn PayloadRetriever>,
    temp_root: PathBuf,
    per_item_max_bytes: u64,
    max_duration_seconds: u64,
    fetch_timeout: Duration,
}

impl FetchStage {
    pub fn new(retriever: Arc<dyn PayloadRetriever>, temp_root: impl Into<PathBuf>) -> Self {
        Self {
            retriever,
            temp_root: temp_root.into(),
            per_item_max_bytes: 100 * 1024 * 1024,
            max_duration_seconds: 180 * 60,
            fetch_timeout: Duration::from_secs(30 * 60),
        }
    }

    /// Build a stage with the limits from `config`
    pub fn from_config(retriever: Arc<dyn PayloadRetriever>, config: &ResolvedConfig) -> Self {
        Self::new(retriever, config.downloads.clone())
            .with_limits(
                config.storage.per_item_max_bytes,
                config.storage.max_duration_seconds,
            )
            .with_timeout(config.fetch.timeout())
    }

    pub fn with_limits(mut self, per_item_max_bytes: u64, max_duration_seconds: u64) -> Self {
        self.per_item_max_bytes = per_item_max_bytes;
        self.max_duration_seconds = max_duration_seconds;
        self
    }

    pub fn with_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    pub fn retriever_name(&self) -> &str {
        self.retriever.name()
    }

    /// Where the payload for `item` lives while it is being processed
    pub fn payload_path_for(&self, item: &WorkItem) -> PathBuf {
        paths::payload_path(
            &self.temp_root,
            &item.collection_id,
            &item.external_id,
            self.retriever.extension(),
        )
    }

    /// Fetch the payload for an item in the `Fetching` state.
    ///
    /// On any failure the partial payload and any retriever intermediates
    /// sharing its stem are removed before the error is returned.
    pub async fn fetch(&self, item: &WorkItem) -> Result<FetchResult, FetchError> {
        if item.state != ItemState::Fetching {
            return Err(FetchError::NotReady { state: item.state });
        }

        if let Some(seconds) = item.duration_seconds {
            if seconds > self.max_duration_seconds {
                return Err(FetchError::DurationExceeded {
                    seconds,
                    limit: self.max_duration_seconds,
                });
            }
        }

        let dest = self.payload_path_for(item);
        let started = Instant::now();
        let retrieval = self.retrieve(&item.external_id, &item.source_url, &dest);

        let outcome = match timeout(self.fetch_timeout, retrieval).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.fetch_timeout)),
        };
        if let Err(e) = outcome {
            discard_partial(&dest).await;
            return Err(e);
        }

        let bytes = match tokio::fs::metadata(&dest).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => meta.len(),
            _ => {
                discard_partial(&dest).await;
                return Err(FetchError::Io("payload missing or empty".to_string()));
            }
        };

        if bytes > self.per_item_max_bytes {
            discard_partial(&dest).await;
            return Err(FetchError::TooLarge {
                size: bytes,
                limit: self.per_item_max_bytes,
            });
        }

        let elapsed = started.elapsed();
        info!(
            item_id = %item.external_id,
            bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "Payload fetched"
        );

        Ok(FetchResult {
            payload_path: dest,
            bytes,
            elapsed,
        })
    }

    async fn retrieve(&self, item_id: &str, url: &str, dest: &Path) -> Result<(), FetchError> {
        match self.retriever.estimate_size(url).await {
            Ok(Some(estimate)) if estimate > self.per_item_max_bytes => {
                return Err(FetchError::TooLarge {
                    size: estimate,
                    limit: self.per_item_max_bytes,
                });
            }
            Ok(estimate) => {
                debug!(item_id, ?estimate, "Size estimate within limit");
            }
            Err(e) => {
                // Estimates are advisory; the post-download check still applies
                warn!(item_id, error = %format!("{:#}", e), "Size estimate unavailable");
            }
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        self.retriever
            .stream(url, dest)
            .await
            .map_err(|e| FetchError::Retrieval(format!("{:#}", e)))
    }
}

/// Remove `dest` and every `<stem>.*` sibling (`.part`, `.ytdl`, other
/// container formats). Payload stems never contain a dot.
async fn discard_partial(dest: &Path) {
    let mut targets = vec![dest.to_path_buf()];
    if let (Some(parent), Some(stem)) = (dest.parent(), dest.file_stem()) {
        let pattern = format!(
            "{}/{}.*",
            glob::Pattern::escape(&parent.to_string_lossy()),
            glob::Pattern::escape(&stem.to_string_lossy())
        );
        match glob::glob(&pattern) {
            Ok(entries) => targets.extend(entries.flatten().filter(|p| p != dest)),
            Err(e) => warn!(%pattern, error = %e, "Invalid cleanup pattern"),
        }
    }

    for path in targets {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "Removed partial payload"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Could not remove partial payload"),
        }
    }
}
