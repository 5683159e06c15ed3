//! WhisperX transcription provider (alignment + speaker diarization).
//!
//! Primary provider. Diarization needs a Hugging Face token; without one the
//! provider still transcribes and aligns, it just reports no speakers.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::whisper::read_json_output;
use super::{ProviderOutput, TranscriptionProvider};

/// Transcription via the `whisperx` CLI
pub struct WhisperXProvider {
    binary_path: String,
    model: String,
    device: String,
    compute_type: String,
    language: Option<String>,
    hf_token: Option<String>,
}

impl WhisperXProvider {
    pub fn new(binary_path: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            model: model.into(),
            device: "cpu".to_string(),
            compute_type: "int8".to_string(),
            language: None,
            hf_token: std::env::var("HF_TOKEN").ok().filter(|t| !t.is_empty()),
        }
    }

    pub fn with_device(mut self, device: impl Into<String>, compute_type: impl Into<String>) -> Self {
        self.device = device.into();
        self.compute_type = compute_type.into();
        self
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    pub fn with_hf_token(mut self, token: Option<String>) -> Self {
        self.hf_token = token;
        self
    }
}

#[async_trait]
impl TranscriptionProvider for WhisperXProvider {
    fn name(&self) -> &str {
        "whisperx"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_speakers(&self) -> bool {
        true
    }

    async fn run(&self, audio_path: &Path) -> Result<ProviderOutput> {
        let temp_dir = tempfile::tempdir().context("Failed to create temp dir")?;

        let mut command = Command::new(&self.binary_path);
        command
            .arg(audio_path)
            .arg("--model")
            .arg(&self.model)
            .arg("--device")
            .arg(&self.device)
            .arg("--compute_type")
            .arg(&self.compute_type)
            .arg("--output_dir")
            .arg(temp_dir.path())
            .arg("--output_format")
            .arg("json");
        if let Some(language) = &self.language {
            command.arg("--language").arg(language);
        }
        match &self.hf_token {
            Some(token) => {
                command.arg("--diarize").arg("--hf_token").arg(token);
            }
            None => debug!("No HF_TOKEN set, skipping diarization"),
        }

        let output = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to run whisperx")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("WhisperX failed: {}", stderr.trim());
        }

        read_json_output(audio_path, temp_dir.path(), self.language.as_deref()).await
    }
}
