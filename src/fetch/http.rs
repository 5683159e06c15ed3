//! Direct HTTP retriever for payloads served as plain files.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::PayloadRetriever;

pub struct HttpRetriever {
    client: reqwest::Client,
    extension: String,
}

impl HttpRetriever {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            extension: extension.into(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl PayloadRetriever for HttpRetriever {
    fn name(&self) -> &str {
        "http"
    }

    fn extension(&self) -> &str {
        &self.extension
    }

    async fn estimate_size(&self, url: &str) -> Result<Option<u64>> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .with_context(|| format!("HEAD request failed for {}", url))?;

        // Servers that reject HEAD just leave us without an estimate
        if !response.status().is_success() {
            return Ok(None);
        }
        // Read the header itself: the HEAD body is always empty
        let length = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        Ok(length)
    }

    async fn stream(&self, url: &str, dest: &Path) -> Result<()> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET request failed for {}", url))?
            .error_for_status()
            .with_context(|| format!("Server rejected download of {}", url))?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.context("Download interrupted")? {
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", dest.display()))?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(url, bytes = written, "HTTP download finished");
        Ok(())
    }
}
