//! Transcription results.

use serde::{Deserialize, Serialize};

/// A single recognized word with optional alignment data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub word: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,

    /// Per-token confidence reported by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// A time-aligned piece of the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,

    /// Segment-level confidence (used when word scores are missing)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<Word>,
}

impl Segment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            speaker: None,
            confidence: None,
            words: Vec::new(),
        }
    }

    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_words(mut self, words: Vec<Word>) -> Self {
        self.words = words;
        self
    }
}

/// Speaker attribution metadata.
///
/// Absence is always explicit and carries a reason, so a transcript produced
/// by the fallback path can be told apart from one with a single speaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SpeakerInfo {
    Present { speakers: Vec<String> },
    Absent { reason: String },
}

impl SpeakerInfo {
    pub const PRIMARY_FAILED: &'static str = "primary_failed";
    pub const NO_SPEAKERS: &'static str = "no_speakers_detected";

    pub fn absent(reason: impl Into<String>) -> Self {
        Self::Absent {
            reason: reason.into(),
        }
    }

    /// Collect distinct speaker labels from segments (in order of appearance)
    pub fn from_segments(segments: &[Segment]) -> Self {
        let mut speakers: Vec<String> = Vec::new();
        for speaker in segments.iter().filter_map(|s| s.speaker.as_ref()) {
            if !speakers.contains(speaker) {
                speakers.push(speaker.clone());
            }
        }

        if speakers.is_empty() {
            Self::absent(Self::NO_SPEAKERS)
        } else {
            Self::Present { speakers }
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }

    pub fn speaker_count(&self) -> usize {
        match self {
            Self::Present { speakers } => speakers.len(),
            Self::Absent { .. } => 0,
        }
    }
}

/// One successful transcription, 1:1 with a completed work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformResult {
    pub text: String,
    pub segments: Vec<Segment>,
    pub language: String,

    /// Mean provider confidence in [0, 1]
    pub confidence: f64,

    pub speakers: SpeakerInfo,

    pub processing_seconds: f64,

    /// Provider that produced the result (e.g. `whisperx`)
    pub provider: String,

    /// Model variant used by the provider (e.g. `base`)
    pub model: String,
}

impl TransformResult {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}
