//! Append-only pipeline journal with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL) for simplicity
//! and easy debugging/inspection.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::domain::{EventType, PipelineEvent};

/// Errors that can occur with the journal
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Failed to access journal {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt journal line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}

/// File-based journal using JSONL format
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    /// Open the journal at `path`, creating its directory if needed
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| JournalError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        Ok(Self { path })
    }

    /// Get the path to the journal file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> JournalError {
        JournalError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Append an event to the log
    pub async fn append(&self, event: &PipelineEvent) -> Result<(), JournalError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        let json = serde_json::to_string(event)?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<PipelineEvent>, JournalError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path).await.map_err(|e| self.io_error(e))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();
        let mut line_no = 0;

        while let Some(line) = lines.next_line().await.map_err(|e| self.io_error(e))? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let event: PipelineEvent =
                serde_json::from_str(&line).map_err(|e| JournalError::Corrupt {
                    line: line_no,
                    reason: e.to_string(),
                })?;
            events.push(event);
        }

        Ok(events)
    }

    /// The last `limit` events, oldest first
    pub async fn recent(&self, limit: usize) -> Result<Vec<PipelineEvent>, JournalError> {
        let mut events = self.replay().await?;
        let skip = events.len().saturating_sub(limit);
        Ok(events.split_off(skip))
    }

    /// Every event recorded for one item
    pub async fn item_history(&self, item_id: &str) -> Result<Vec<PipelineEvent>, JournalError> {
        let events = self.replay().await?;
        Ok(events
            .into_iter()
            .filter(|e| e.item_id.as_deref() == Some(item_id))
            .collect())
    }

    /// Get the last event of a specific type
    pub async fn last_event_of_type(
        &self,
        event_type: EventType,
    ) -> Result<Option<PipelineEvent>, JournalError> {
        let events = self.replay().await?;
        Ok(events.into_iter().rev().find(|e| e.event_type == event_type))
    }
}
