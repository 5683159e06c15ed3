//! Transform stage: primary/fallback transcription and artifact persistence.
//!
//! The stage never deletes the payload. The orchestrator removes it once the
//! outcome is committed to the item store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

use super::{ArtifactSink, ProviderOutput, TranscriptionProvider};
use crate::domain::{SpeakerInfo, TransformResult, WorkItem};

/// Errors that can occur while transforming one item
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Payload missing or empty: {0}")]
    MissingPayload(PathBuf),

    /// Logged when the primary provider fails; the fallback takes over
    #[error("Primary provider {provider} failed: {error}")]
    PrimaryProviderFailed { provider: String, error: String },

    #[error("All providers failed (primary: {primary}; fallback: {fallback})")]
    AllProvidersFailed { primary: String, fallback: String },

    #[error("No transcription providers configured")]
    NoProviders,

    #[error("Failed to persist artifacts: {0}")]
    Sink(String),
}

impl TransformError {
    /// Stable error kind recorded on the failed item
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingPayload(_) => "missing_payload",
            Self::PrimaryProviderFailed { .. } => "primary_failed",
            Self::AllProvidersFailed { .. } => "all_providers_failed",
            Self::NoProviders => "no_providers",
            Self::Sink(_) => "sink",
        }
    }
}

/// A persisted transform result
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub result: TransformResult,
    pub output_path: PathBuf,
    pub elapsed: Duration,
}

/// Runs providers in order and persists the first success
pub struct TransformStage {
    providers: Vec<Arc<dyn TranscriptionProvider>>,
    sink: Arc<dyn ArtifactSink>,
    provider_timeout: Duration,
}

impl TransformStage {
    /// `providers` are tried in order: the first is the primary.
    pub fn new(
        providers: Vec<Arc<dyn TranscriptionProvider>>,
        sink: Arc<dyn ArtifactSink>,
    ) -> Self {
        Self {
            providers,
            sink,
            provider_timeout: Duration::from_secs(2 * 60 * 60),
        }
    }

    pub fn with_timeout(mut self, provider_timeout: Duration) -> Self {
        self.provider_timeout = provider_timeout;
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Transcribe one fetched payload and persist the artifacts.
    pub async fn transform(
        &self,
        item: &WorkItem,
        payload_path: &Path,
    ) -> Result<TransformOutput, TransformError> {
        match tokio::fs::metadata(payload_path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            _ => return Err(TransformError::MissingPayload(payload_path.to_path_buf())),
        }

        let started = Instant::now();
        let (result, output_path) = self
            .transcribe_and_persist(item, payload_path, started)
            .await?;
        let elapsed = started.elapsed();

        info!(
            item_id = %item.external_id,
            provider = %result.provider,
            language = %result.language,
            confidence = result.confidence,
            elapsed_ms = elapsed.as_millis() as u64,
            "Transform completed"
        );

        Ok(TransformOutput {
            result,
            output_path,
            elapsed,
        })
    }

    async fn transcribe_and_persist(
        &self,
        item: &WorkItem,
        payload_path: &Path,
        started: Instant,
    ) -> Result<(TransformResult, PathBuf), TransformError> {
        let (output, provider, primary_failed) = self.run_providers(item, payload_path).await?;

        let speakers = if primary_failed {
            SpeakerInfo::absent(SpeakerInfo::PRIMARY_FAILED)
        } else {
            SpeakerInfo::from_segments(&output.segments)
        };

        let result = TransformResult {
            confidence: output.confidence(),
            text: output.text,
            segments: output.segments,
            language: output.language,
            speakers,
            processing_seconds: started.elapsed().as_secs_f64(),
            provider: provider.name().to_string(),
            model: provider.model().to_string(),
        };

        let output_path = self
            .sink
            .persist(item, &result)
            .await
            .map_err(|e| TransformError::Sink(format!("{:#}", e)))?;

        Ok((result, output_path))
    }

    /// Try each provider in order; returns the output, the provider that
    /// produced it, and whether the primary failed first.
    async fn run_providers(
        &self,
        item: &WorkItem,
        payload_path: &Path,
    ) -> Result<(ProviderOutput, Arc<dyn TranscriptionProvider>, bool), TransformError> {
        let mut errors: Vec<String> = Vec::new();

        for (index, provider) in self.providers.iter().enumerate() {
            match self.attempt(provider.as_ref(), payload_path).await {
                Ok(output) => return Ok((output, Arc::clone(provider), index > 0)),
                Err(error) => {
                    if index == 0 {
                        let failure = TransformError::PrimaryProviderFailed {
                            provider: provider.name().to_string(),
                            error: error.clone(),
                        };
                        warn!(item_id = %item.external_id, stage = "transform", error = %failure, "Falling back");
                    } else {
                        warn!(
                            item_id = %item.external_id,
                            stage = "transform",
                            provider = provider.name(),
                            error = %error,
                            "Fallback provider failed"
                        );
                    }
                    errors.push(format!("{}: {}", provider.name(), error));
                }
            }
        }

        if errors.is_empty() {
            return Err(TransformError::NoProviders);
        }

        let primary = errors.remove(0);
        let fallback = if errors.is_empty() {
            "no fallback configured".to_string()
        } else {
            errors.join("; ")
        };
        Err(TransformError::AllProvidersFailed { primary, fallback })
    }

    async fn attempt(
        &self,
        provider: &dyn TranscriptionProvider,
        payload_path: &Path,
    ) -> Result<ProviderOutput, String> {
        match timeout(self.provider_timeout, provider.run(payload_path)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(_) => Err(format!("timed out after {:?}", self.provider_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewItem, Segment};
    use crate::store::ItemStore;
    use crate::transform::FileArtifactSink;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FakeProvider {
        name: &'static str,
        fail: bool,
        speaker: Option<&'static str>,
        delay: Duration,
    }

    impl FakeProvider {
        fn ok(name: &'static str) -> Self {
            Self {
                name,
                fail: false,
                speaker: None,
                delay: Duration::ZERO,
            }
        }

        fn failing(name: &'static str) -> Self {
            Self {
                fail: true,
                ..Self::ok(name)
            }
        }
    }

    #[async_trait]
    impl TranscriptionProvider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn model(&self) -> &str {
            "test"
        }

        fn supports_speakers(&self) -> bool {
            self.speaker.is_some()
        }

        async fn run(&self, _audio_path: &Path) -> anyhow::Result<ProviderOutput> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                anyhow::bail!("{} exploded", self.name);
            }

            let mut segment = Segment::new(0.0, 1.0, "hello world").with_confidence(0.8);
            if let Some(speaker) = self.speaker {
                segment = segment.with_speaker(speaker);
            }
            Ok(ProviderOutput {
                text: "hello world".to_string(),
                segments: vec![segment],
                language: "en".to_string(),
            })
        }
    }

    struct Fixture {
        _temp: TempDir,
        downloads: PathBuf,
        output: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let downloads = temp.path().join("downloads");
            let output = temp.path().join("out");
            std::fs::create_dir_all(downloads.join("chan")).unwrap();
            Self {
                downloads,
                output,
                _temp: temp,
            }
        }

        fn stage(&self, providers: Vec<FakeProvider>) -> TransformStage {
            let providers = providers
                .into_iter()
                .map(|p| Arc::new(p) as Arc<dyn TranscriptionProvider>)
                .collect();
            TransformStage::new(providers, Arc::new(FileArtifactSink::new(&self.output)))
        }

        fn payload(&self) -> PathBuf {
            let path = self.downloads.join("chan/vid1.mp3");
            std::fs::write(&path, vec![0u8; 256]).unwrap();
            path
        }
    }

    fn item() -> WorkItem {
        let store = ItemStore::in_memory().unwrap();
        store
            .put(&NewItem::new("vid1", "Video", "https://example.com/v", "chan"))
            .unwrap()
            .item()
            .clone()
    }

    #[tokio::test]
    async fn test_primary_success_leaves_payload_to_caller() {
        let fixture = Fixture::new();
        let primary = FakeProvider {
            speaker: Some("SPEAKER_00"),
            ..FakeProvider::ok("primary")
        };
        let stage = fixture.stage(vec![primary, FakeProvider::ok("fallback")]);
        let payload = fixture.payload();

        let output = stage.transform(&item(), &payload).await.unwrap();

        assert_eq!(output.result.provider, "primary");
        assert_eq!(output.result.language, "en");
        assert!(output.result.speakers.is_present());
        assert!((output.result.confidence - 0.8).abs() < 1e-9);
        assert!(output.output_path.exists());
        assert!(payload.exists());
    }

    #[tokio::test]
    async fn test_primary_without_speakers() {
        let fixture = Fixture::new();
        let stage = fixture.stage(vec![FakeProvider::ok("primary")]);

        let output = stage.transform(&item(), &fixture.payload()).await.unwrap();
        assert_eq!(
            output.result.speakers,
            SpeakerInfo::absent(SpeakerInfo::NO_SPEAKERS)
        );
    }

    #[tokio::test]
    async fn test_fallback_marks_primary_failed() {
        let fixture = Fixture::new();
        let stage = fixture.stage(vec![
            FakeProvider::failing("primary"),
            FakeProvider::ok("fallback"),
        ]);

        let output = stage.transform(&item(), &fixture.payload()).await.unwrap();

        assert_eq!(output.result.provider, "fallback");
        assert_eq!(
            output.result.speakers,
            SpeakerInfo::absent(SpeakerInfo::PRIMARY_FAILED)
        );
    }

    #[tokio::test]
    async fn test_primary_timeout_uses_fallback() {
        let fixture = Fixture::new();
        let slow = FakeProvider {
            delay: Duration::from_secs(5),
            ..FakeProvider::ok("primary")
        };
        let stage = fixture
            .stage(vec![slow, FakeProvider::ok("fallback")])
            .with_timeout(Duration::from_millis(50));

        let output = stage.transform(&item(), &fixture.payload()).await.unwrap();
        assert_eq!(output.result.provider, "fallback");
    }

    #[tokio::test]
    async fn test_all_providers_failed() {
        let fixture = Fixture::new();
        let stage = fixture.stage(vec![
            FakeProvider::failing("primary"),
            FakeProvider::failing("fallback"),
        ]);
        let payload = fixture.payload();

        let err = stage.transform(&item(), &payload).await.unwrap_err();

        match &err {
            TransformError::AllProvidersFailed { primary, fallback } => {
                assert!(primary.contains("primary exploded"));
                assert!(fallback.contains("fallback exploded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.kind(), "all_providers_failed");
        assert!(payload.exists());
    }

    #[tokio::test]
    async fn test_missing_payload() {
        let fixture = Fixture::new();
        let stage = fixture.stage(vec![FakeProvider::ok("primary")]);

        let missing = fixture.downloads.join("chan/nope.mp3");
        let err = stage.transform(&item(), &missing).await.unwrap_err();
        assert!(matches!(err, TransformError::MissingPayload(_)));
    }
}
