//! tubescribe - Storage-constrained media transcription pipeline
//!
//! Discovers media items, fetches their audio into a bounded temp area,
//! transcribes them, and keeps the results, without ever letting temporary
//! payloads outgrow a configured ceiling.
//!
//! # Architecture
//!
//! Every item moves through a strict state machine:
//! `Pending → Fetching → Fetched → Transforming → Completed`, with `Failed`
//! reachable from any in-flight state. The orchestrator is the only writer
//! of state; the item store is the only durable owner of the record.
//! Payloads are deleted as soon as their transcript is persisted, and the
//! quota manager evicts oldest payloads first whenever usage crosses 80% of
//! the ceiling.
//!
//! # Modules
//!
//! - `store`: Durable item store (SQLite)
//! - `storage`: Temp storage quota and eviction
//! - `fetch`: Payload retrieval (yt-dlp, HTTP)
//! - `transform`: Transcription providers and artifact persistence
//! - `discovery`: Sources of new items
//! - `core`: Orchestrator, journal, reports
//! - `domain`: Data structures (WorkItem, TransformResult, PipelineEvent)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # One discovery + processing cycle
//! tubescribe cycle
//!
//! # Keep running on the configured schedule
//! tubescribe watch
//!
//! # Retry an item that failed
//! tubescribe requeue <id>
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod discovery;
pub mod domain;
pub mod fetch;
pub mod storage;
pub mod store;
pub mod transform;

// Re-export main types at crate root for convenience
pub use core::{BatchReport, CycleReport, ItemOutcome, Journal, Orchestrator, PipelineError};
pub use discovery::{DiscoveryError, DiscoverySource, ManifestDiscovery, StaticDiscovery};
pub use domain::{ItemState, NewItem, PipelineEvent, SpeakerInfo, TransformResult, WorkItem};
pub use fetch::{FetchError, FetchStage, PayloadRetriever};
pub use storage::{EvictionReport, QuotaError, QuotaManager, StorageSnapshot};
pub use store::{ItemStore, StoreError};
pub use transform::{ArtifactSink, TranscriptionProvider, TransformError, TransformStage};
