//! Whisper transcription provider.
//!
//! Shells out to the local `whisper` binary. No speaker labels; this is the
//! fallback provider.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::{ProviderOutput, TranscriptionProvider};
use crate::domain::{Segment, Word};

/// JSON written by `whisper` and `whisperx` with `--output_format json`
#[derive(Debug, Deserialize)]
pub(crate) struct RawTranscript {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<RawSegment>,
}

#[derive(Debug, Deserialize)]
struct RawSegment {
    #[serde(default)]
    start: f64,
    #[serde(default)]
    end: f64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    speaker: Option<String>,
    #[serde(default, alias = "score")]
    confidence: Option<f64>,
    #[serde(default)]
    words: Vec<RawWord>,
}

#[derive(Debug, Deserialize)]
struct RawWord {
    #[serde(default)]
    word: String,
    #[serde(default)]
    start: Option<f64>,
    #[serde(default)]
    end: Option<f64>,
    /// `probability` from whisper, `score` from whisperx
    #[serde(default, alias = "probability", alias = "score")]
    confidence: Option<f64>,
}

impl RawTranscript {
    pub(crate) fn into_output(self, default_language: Option<&str>) -> ProviderOutput {
        let segments: Vec<Segment> = self
            .segments
            .into_iter()
            .map(|s| Segment {
                start: s.start,
                end: s.end,
                text: s.text.trim().to_string(),
                speaker: s.speaker,
                confidence: s.confidence,
                words: s
                    .words
                    .into_iter()
                    .map(|w| Word {
                        word: w.word.trim().to_string(),
                        start: w.start,
                        end: w.end,
                        confidence: w.confidence,
                    })
                    .collect(),
            })
            .collect();

        // whisperx omits the top-level text
        let text = match self.text {
            Some(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => segments
                .iter()
                .map(|s| s.text.as_str())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        };

        let language = self
            .language
            .filter(|l| !l.is_empty())
            .or_else(|| default_language.map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());

        ProviderOutput {
            text,
            segments,
            language,
        }
    }
}

/// Read the `<stem>.json` a whisper-style binary left in `output_dir`
pub(crate) async fn read_json_output(
    audio_path: &Path,
    output_dir: &Path,
    default_language: Option<&str>,
) -> Result<ProviderOutput> {
    let stem = audio_path.file_stem().unwrap_or_default().to_string_lossy();
    let json_path = output_dir.join(format!("{}.json", stem));

    let json_content = tokio::fs::read_to_string(&json_path)
        .await
        .with_context(|| format!("Failed to read transcription output {}", json_path.display()))?;

    let raw: RawTranscript =
        serde_json::from_str(&json_content).context("Failed to parse transcription JSON")?;
    Ok(raw.into_output(default_language))
}

/// Transcription via the `whisper` CLI
pub struct WhisperProvider {
    binary_path: String,
    model: String,
    language: Option<String>,
}

impl WhisperProvider {
    pub fn new(binary_path: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            model: model.into(),
            language: None,
        }
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }
}

#[async_trait]
impl TranscriptionProvider for WhisperProvider {
    fn name(&self) -> &str {
        "whisper"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_speakers(&self) -> bool {
        false
    }

    async fn run(&self, audio_path: &Path) -> Result<ProviderOutput> {
        let temp_dir = tempfile::tempdir().context("Failed to create temp dir")?;

        let mut command = Command::new(&self.binary_path);
        command
            .arg(audio_path)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_dir")
            .arg(temp_dir.path())
            .arg("--output_format")
            .arg("json")
            .arg("--word_timestamps")
            .arg("True");
        if let Some(language) = &self.language {
            command.arg("--language").arg(language);
        }

        let output = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to run whisper")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Whisper failed: {}", stderr.trim());
        }

        read_json_output(audio_path, temp_dir.path(), self.language.as_deref()).await
    }
}
