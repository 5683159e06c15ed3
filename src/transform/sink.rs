//! Artifact persistence.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::format;
use crate::config::paths;
use crate::domain::{Segment, SpeakerInfo, TransformResult, WorkItem};

/// Where transform results end up
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Durably store `result`, returning the primary artifact path.
    ///
    /// Must not return before the data is on disk: the payload is deleted
    /// once the item is committed as completed.
    async fn persist(&self, item: &WorkItem, result: &TransformResult) -> Result<PathBuf>;
}

/// `transcription.json` schema
#[derive(Debug, Serialize)]
struct ArtifactDocument<'a> {
    item_id: &'a str,
    title: &'a str,
    source_url: &'a str,
    collection_id: &'a str,
    collection_name: &'a str,
    duration_seconds: Option<u64>,
    discovered_at: DateTime<Utc>,
    fetched_at: Option<DateTime<Utc>>,
    transcribed_at: DateTime<Utc>,

    language: &'a str,
    speakers: &'a SpeakerInfo,
    segments: &'a [Segment],
    full_text: &'a str,

    confidence: f64,
    word_count: usize,
    segment_count: usize,

    provider: &'a str,
    model: &'a str,
    processing_seconds: f64,
}

/// Writes JSON, plain text, and SRT artifacts under the output root
#[derive(Debug, Clone)]
pub struct FileArtifactSink {
    output_root: PathBuf,
}

impl FileArtifactSink {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Directory the artifacts for `item` are written to
    pub fn item_dir(&self, item: &WorkItem) -> PathBuf {
        paths::artifact_dir(
            &self.output_root,
            item.collection_label(),
            &item.title,
            &item.external_id,
        )
    }
}

#[async_trait]
impl ArtifactSink for FileArtifactSink {
    async fn persist(&self, item: &WorkItem, result: &TransformResult) -> Result<PathBuf> {
        let dir = self.item_dir(item);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create artifact dir {}", dir.display()))?;

        let now = Utc::now();
        let document = ArtifactDocument {
            item_id: &item.external_id,
            title: &item.title,
            source_url: &item.source_url,
            collection_id: &item.collection_id,
            collection_name: item.collection_label(),
            duration_seconds: item.duration_seconds,
            discovered_at: item.discovered_at,
            fetched_at: item.fetched_at,
            transcribed_at: now,
            language: &result.language,
            speakers: &result.speakers,
            segments: &result.segments,
            full_text: &result.text,
            confidence: result.confidence,
            word_count: result.word_count(),
            segment_count: result.segments.len(),
            provider: &result.provider,
            model: &result.model,
            processing_seconds: result.processing_seconds,
        };

        // Secondary artifacts first; the JSON appearing marks completion
        write_atomic(
            &dir.join("transcript.txt"),
            &format::transcript_text(item, result, now),
        )
        .await?;
        write_atomic(&dir.join("subtitles.srt"), &format::srt(&result.segments)).await?;

        let json_path = dir.join("transcription.json");
        let json = serde_json::to_string_pretty(&document)?;
        write_atomic(&json_path, &json).await?;

        info!(item_id = %item.external_id, path = %dir.display(), "Artifacts saved");
        Ok(json_path)
    }
}

/// Write and fsync a sibling temp file, then rename over the target
async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name));

    let mut file = tokio::fs::File::create(&temp_path)
        .await
        .with_context(|| format!("Failed to create {}", temp_path.display()))?;
    file.write_all(contents.as_bytes())
        .await
        .with_context(|| format!("Failed to write {}", temp_path.display()))?;
    file.sync_all()
        .await
        .with_context(|| format!("Failed to sync {}", temp_path.display()))?;
    drop(file);

    tokio::fs::rename(&temp_path, path)
        .await
        .with_context(|| format!("Failed to move artifact into place at {}", path.display()))?;

    if let Some(dir) = path.parent() {
        sync_dir(dir).await;
    }
    Ok(())
}

/// Persist a rename in `dir`
#[cfg(unix)]
async fn sync_dir(dir: &Path) {
    let synced = match tokio::fs::File::open(dir).await {
        Ok(handle) => handle.sync_all().await,
        Err(e) => Err(e),
    };
    if let Err(e) = synced {
        warn!(dir = %dir.display(), error = %e, "Failed to sync artifact directory");
    }
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ItemState, NewItem};
    use crate::store::ItemStore;
    use tempfile::TempDir;

    fn item() -> WorkItem {
        let store = ItemStore::in_memory().unwrap();
        store
            .put(
                &NewItem::new("vid1", "Rust: the good parts!", "https://example.com/v", "chan-1")
                    .with_collection_name("Rust Channel")
                    .with_duration(125),
            )
            .unwrap()
            .item()
            .clone()
    }

    fn result() -> TransformResult {
        TransformResult {
            text: "Hello there".to_string(),
            segments: vec![Segment::new(0.0, 1.0, "Hello there").with_speaker("SPEAKER_00")],
            language: "en".to_string(),
            confidence: 0.9,
            speakers: SpeakerInfo::Present {
                speakers: vec!["SPEAKER_00".to_string()],
            },
            processing_seconds: 2.0,
            provider: "whisperx".to_string(),
            model: "base".to_string(),
        }
    }

    #[tokio::test]
    async fn test_persist_writes_all_artifacts() {
        let temp = TempDir::new().unwrap();
        let sink = FileArtifactSink::new(temp.path());
        let item = item();
        assert_eq!(item.state, ItemState::Pending);

        let json_path = sink.persist(&item, &result()).await.unwrap();
        let dir = json_path.parent().unwrap();

        assert_eq!(json_path.file_name().unwrap(), "transcription.json");
        assert!(dir.ends_with("Rust the good parts_vid1"));
        assert!(dir.join("transcript.txt").exists());
        assert!(dir.join("subtitles.srt").exists());

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(json["item_id"], "vid1");
        assert_eq!(json["language"], "en");
        assert_eq!(json["word_count"], 2);
        assert_eq!(json["speakers"]["status"], "present");

        let text = std::fs::read_to_string(dir.join("transcript.txt")).unwrap();
        assert!(text.contains("Duration: 2:05"));
        assert!(text.contains("[00:00] Speaker SPEAKER_00: Hello there"));

        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("transcript.txt");
        std::fs::write(&path, "stale").unwrap();

        write_atomic(&path, "fresh contents").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fresh contents");
        assert!(!temp.path().join(".transcript.txt.tmp").exists());
    }

    #[tokio::test]
    async fn test_persist_overwrites_previous_run() {
        let temp = TempDir::new().unwrap();
        let sink = FileArtifactSink::new(temp.path());

        let first = sink.persist(&item(), &result()).await.unwrap();
        let second = sink.persist(&item(), &result()).await.unwrap();
        assert_eq!(first, second);
    }
}
