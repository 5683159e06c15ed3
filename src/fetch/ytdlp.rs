//! yt-dlp retriever.
//!
//! Shells out to `yt-dlp` for audio-only downloads.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::PayloadRetriever;

/// Metadata fields we read from `--dump-single-json`
#[derive(Debug, Default, Deserialize)]
struct MediaInfo {
    #[serde(default)]
    filesize: Option<u64>,
    #[serde(default)]
    filesize_approx: Option<u64>,
    #[serde(default)]
    duration: Option<f64>,
    /// Average audio bitrate in kbit/s
    #[serde(default)]
    abr: Option<f64>,
}

impl MediaInfo {
    fn estimated_bytes(&self) -> Option<u64> {
        if let Some(size) = self.filesize.or(self.filesize_approx) {
            return Some(size);
        }

        match (self.duration, self.abr) {
            (Some(duration), Some(abr)) if duration > 0.0 && abr > 0.0 => {
                Some((duration * abr * 1000.0 / 8.0) as u64)
            }
            _ => None,
        }
    }
}

/// Audio-only retriever backed by the `yt-dlp` binary
pub struct YtDlpRetriever {
    binary_path: String,
    audio_format: String,
}

impl Default for YtDlpRetriever {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl YtDlpRetriever {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            audio_format: "mp3".to_string(),
        }
    }

    pub fn with_audio_format(mut self, format: impl Into<String>) -> Self {
        self.audio_format = format.into();
        self
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new(&self.binary_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.binary_path))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "yt-dlp failed with exit code {}: {}",
                exit_code,
                stderr.trim()
            );
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl PayloadRetriever for YtDlpRetriever {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    fn extension(&self) -> &str {
        &self.audio_format
    }

    async fn estimate_size(&self, url: &str) -> Result<Option<u64>> {
        let stdout = self
            .run(&["--dump-single-json", "--no-playlist", "-f", "bestaudio", url])
            .await?;

        let info: MediaInfo =
            serde_json::from_slice(&stdout).context("Failed to parse yt-dlp metadata")?;
        Ok(info.estimated_bytes())
    }

    async fn stream(&self, url: &str, dest: &Path) -> Result<()> {
        // yt-dlp picks the final extension itself; hand it the stem
        let template = dest.with_extension("%(ext)s");
        let template = template.to_string_lossy();

        debug!(url, dest = %dest.display(), "Downloading with yt-dlp");
        self.run(&[
            "--no-playlist",
            "--quiet",
            "--no-progress",
            "--force-overwrites",
            "-x",
            "--audio-format",
            &self.audio_format,
            "-o",
            &template,
            url,
        ])
        .await?;

        Ok(())
    }
}
