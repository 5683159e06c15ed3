//! Transcription of fetched payloads.
//!
//! The transform stage runs an ordered list of [`TranscriptionProvider`]s
//! (primary first, then fallback), persists the result through an
//! [`ArtifactSink`], and frees the payload as soon as the result is safe.

pub mod format;
pub mod sink;
pub mod stage;
pub mod whisper;
pub mod whisperx;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::Segment;

pub use sink::{ArtifactSink, FileArtifactSink};
pub use stage::{TransformError, TransformOutput, TransformStage};
pub use whisper::WhisperProvider;
pub use whisperx::WhisperXProvider;

/// Raw output of one provider run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderOutput {
    pub text: String,
    pub segments: Vec<Segment>,
    pub language: String,
}

impl ProviderOutput {
    /// Every per-word confidence the provider reported
    pub fn token_confidences(&self) -> Vec<f64> {
        self.segments
            .iter()
            .flat_map(|s| s.words.iter())
            .filter_map(|w| w.confidence)
            .collect()
    }

    /// Mean of word confidences, else of segment confidences, else 0.
    /// Always within [0, 1].
    pub fn confidence(&self) -> f64 {
        let tokens = self.token_confidences();
        let scores = if tokens.is_empty() {
            self.segments.iter().filter_map(|s| s.confidence).collect()
        } else {
            tokens
        };

        let scores: Vec<f64> = scores.into_iter().filter(|s| s.is_finite()).collect();
        if scores.is_empty() {
            return 0.0;
        }

        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        mean.clamp(0.0, 1.0)
    }
}

/// Trait for transcription providers
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    /// Provider name recorded on results (e.g. `whisperx`)
    fn name(&self) -> &str;

    /// Model variant (e.g. `base`)
    fn model(&self) -> &str;

    /// Whether this provider can label speakers
    fn supports_speakers(&self) -> bool;

    /// Transcribe the audio file at `audio_path`
    async fn run(&self, audio_path: &Path) -> Result<ProviderOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Word;

    fn word(confidence: Option<f64>) -> Word {
        Word {
            word: "w".to_string(),
            start: None,
            end: None,
            confidence,
        }
    }

    #[test]
    fn test_confidence_prefers_words() {
        let output = ProviderOutput {
            segments: vec![Segment::new(0.0, 1.0, "a b")
                .with_confidence(0.1)
                .with_words(vec![word(Some(0.8)), word(Some(0.6)), word(None)])],
            ..ProviderOutput::default()
        };
        assert!((output.confidence() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_falls_back_to_segments() {
        let output = ProviderOutput {
            segments: vec![
                Segment::new(0.0, 1.0, "a").with_confidence(0.5),
                Segment::new(1.0, 2.0, "b").with_confidence(1.0),
                Segment::new(2.0, 3.0, "c"),
            ],
            ..ProviderOutput::default()
        };
        assert!((output.confidence() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_defaults_to_zero_and_clamps() {
        assert_eq!(ProviderOutput::default().confidence(), 0.0);

        let output = ProviderOutput {
            segments: vec![Segment::new(0.0, 1.0, "a").with_confidence(3.0)],
            ..ProviderOutput::default()
        };
        assert_eq!(output.confidence(), 1.0);
    }
}
