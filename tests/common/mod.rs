//! Shared fakes and fixtures for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use tubescribe::core::{Journal, Orchestrator};
use tubescribe::discovery::{DiscoverySource, StaticDiscovery};
use tubescribe::domain::{NewItem, Segment, Word};
use tubescribe::fetch::{FetchStage, PayloadRetriever};
use tubescribe::storage::QuotaManager;
use tubescribe::store::ItemStore;
use tubescribe::transform::{
    ArtifactSink, FileArtifactSink, ProviderOutput, TranscriptionProvider, TransformStage,
};

/// Retriever that writes a fixed number of bytes
pub struct FakeRetriever {
    pub estimate: Option<u64>,
    pub payload_size: usize,
    pub stream_calls: AtomicUsize,
}

#[async_trait]
impl PayloadRetriever for FakeRetriever {
    fn name(&self) -> &str {
        "fake"
    }

    fn extension(&self) -> &str {
        "mp3"
    }

    async fn estimate_size(&self, _url: &str) -> Result<Option<u64>> {
        Ok(self.estimate)
    }

    async fn stream(&self, _url: &str, dest: &Path) -> Result<()> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(dest, vec![7u8; self.payload_size]).await?;
        Ok(())
    }
}

/// Provider that either fails or returns a two-segment transcript
pub struct FakeProvider {
    pub name: &'static str,
    pub fail: bool,
    pub speakers: bool,
}

#[async_trait]
impl TranscriptionProvider for FakeProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        "tiny"
    }

    fn supports_speakers(&self) -> bool {
        self.speakers
    }

    async fn run(&self, audio_path: &Path) -> Result<ProviderOutput> {
        if self.fail {
            anyhow::bail!("{} could not read {}", self.name, audio_path.display());
        }

        let word = |w: &str, confidence: f64| Word {
            word: w.to_string(),
            start: None,
            end: None,
            confidence: Some(confidence),
        };
        let mut first = Segment::new(0.0, 1.0, "hello there")
            .with_words(vec![word("hello", 0.9), word("there", 0.7)]);
        let mut second = Segment::new(1.0, 2.5, "general kenobi")
            .with_words(vec![word("general", 0.8), word("kenobi", 0.6)]);
        if self.speakers {
            first = first.with_speaker("SPEAKER_00");
            second = second.with_speaker("SPEAKER_01");
        }

        Ok(ProviderOutput {
            text: "hello there general kenobi".to_string(),
            segments: vec![first, second],
            language: "en".to_string(),
        })
    }
}

/// Builds the artifact sink from the harness store and output root
pub type SinkFactory = Box<dyn FnOnce(Arc<ItemStore>, &Path) -> Arc<dyn ArtifactSink>>;

pub struct Options {
    pub estimate: Option<u64>,
    pub payload_size: usize,
    pub primary_fails: bool,
    pub fallback_fails: bool,
    pub ceiling_bytes: u64,
    pub per_item_max_bytes: u64,
    pub discovery: Option<Arc<dyn DiscoverySource>>,
    pub retain_failed_payloads: bool,
    pub sink: Option<SinkFactory>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            estimate: None,
            payload_size: 100,
            primary_fails: false,
            fallback_fails: false,
            ceiling_bytes: 10_000,
            per_item_max_bytes: 1_000,
            discovery: None,
            retain_failed_payloads: false,
            sink: None,
        }
    }
}

pub struct Harness {
    pub temp: TempDir,
    pub downloads: PathBuf,
    pub output: PathBuf,
    pub store: Arc<ItemStore>,
    pub quota: Arc<QuotaManager>,
    pub retriever: Arc<FakeRetriever>,
    pub discovery: Arc<StaticDiscovery>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub async fn new(options: Options) -> Self {
        let temp = TempDir::new().unwrap();
        let downloads = temp.path().join("downloads");
        let output = temp.path().join("transcriptions");
        std::fs::create_dir_all(&downloads).unwrap();

        let store = Arc::new(ItemStore::open(&temp.path().join("tubescribe.db")).unwrap());
        let quota = Arc::new(QuotaManager::new(&downloads, options.ceiling_bytes));

        let retriever = Arc::new(FakeRetriever {
            estimate: options.estimate,
            payload_size: options.payload_size,
            stream_calls: AtomicUsize::new(0),
        });
        let fetch = FetchStage::new(retriever.clone(), &downloads)
            .with_limits(options.per_item_max_bytes, 3 * 60 * 60);

        let providers: Vec<Arc<dyn TranscriptionProvider>> = vec![
            Arc::new(FakeProvider {
                name: "whisperx",
                fail: options.primary_fails,
                speakers: true,
            }),
            Arc::new(FakeProvider {
                name: "whisper",
                fail: options.fallback_fails,
                speakers: false,
            }),
        ];
        let sink: Arc<dyn ArtifactSink> = match options.sink {
            Some(factory) => factory(Arc::clone(&store), &output),
            None => Arc::new(FileArtifactSink::new(&output)),
        };
        let transform = TransformStage::new(providers, sink);

        let discovery = Arc::new(StaticDiscovery::default());
        let source: Arc<dyn DiscoverySource> = match options.discovery {
            Some(source) => source,
            None => discovery.clone(),
        };

        let journal = Journal::open(temp.path().join("journal.jsonl"))
            .await
            .unwrap();

        let orchestrator = Orchestrator::new(
            Arc::clone(&store),
            Arc::clone(&quota),
            fetch,
            transform,
            source,
            journal,
        )
        .retaining_failed_payloads(options.retain_failed_payloads);

        Self {
            temp,
            downloads,
            output,
            store,
            quota,
            retriever,
            discovery,
            orchestrator,
        }
    }

    /// Temp payload files still on disk
    pub fn payload_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut dirs = vec![self.downloads.clone()];
        while let Some(dir) = dirs.pop() {
            for entry in std::fs::read_dir(&dir).unwrap().flatten() {
                let path = entry.path();
                if path.is_dir() {
                    dirs.push(path);
                } else {
                    files.push(path);
                }
            }
        }
        files
    }
}

pub fn new_item(id: &str) -> NewItem {
    NewItem::new(
        id,
        format!("Episode {}", id),
        format!("https://example.com/watch?v={}", id),
        "chan",
    )
    .with_collection_name("Test Channel")
    .with_duration(600)
}
