//! Payload retrieval.
//!
//! The fetch stage turns a `Fetching` item into a local payload file under
//! the temp root. Retrieval itself goes through a [`PayloadRetriever`] so the
//! stage can be driven by `yt-dlp`, plain HTTP, or a test fake.

pub mod http;
pub mod stage;
pub mod ytdlp;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

pub use http::HttpRetriever;
pub use stage::{FetchError, FetchResult, FetchStage};
pub use ytdlp::YtDlpRetriever;

/// Trait for payload retrievers
#[async_trait]
pub trait PayloadRetriever: Send + Sync {
    /// Human-readable retriever name
    fn name(&self) -> &str;

    /// File extension of the payloads this retriever writes
    fn extension(&self) -> &str;

    /// Best-effort size estimate in bytes, `None` when unknown
    async fn estimate_size(&self, url: &str) -> Result<Option<u64>>;

    /// Write the payload for `url` to exactly `dest`
    async fn stream(&self, url: &str, dest: &Path) -> Result<()>;
}
