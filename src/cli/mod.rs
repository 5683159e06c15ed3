//! Command-line interface for tubescribe.
//!
//! Provides commands for running cycles (once or on a schedule), processing
//! single items, inspecting the item store and temp storage, and operator
//! actions like requeue and emergency cleanup.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fs2::FileExt;
use tokio_util::sync::CancellationToken;

use crate::config::{self, FetchBackend, ResolvedConfig};
use crate::core::{CycleReport, ItemOutcome, Journal, Orchestrator};
use crate::discovery::{DiscoverySource, ManifestDiscovery, StaticDiscovery};
use crate::domain::{ItemState, NewItem};
use crate::fetch::{FetchStage, HttpRetriever, PayloadRetriever, YtDlpRetriever};
use crate::storage::{QuotaManager, StorageSnapshot};
use crate::store::ItemStore;
use crate::transform::{
    FileArtifactSink, TranscriptionProvider, TransformStage, WhisperProvider, WhisperXProvider,
};

/// tubescribe - Storage-constrained media transcription pipeline
#[derive(Parser, Debug)]
#[command(name = "tubescribe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one discovery + processing cycle
    Cycle,

    /// Run cycles continuously until Ctrl+C
    Watch {
        /// Minutes between cycles (defaults to the configured interval)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Process a single pending item now
    Process {
        /// External item id
        id: String,
    },

    /// Add an item by hand (bypasses discovery)
    Add {
        /// Source URL
        url: String,

        /// External item id
        #[arg(long)]
        id: String,

        /// Display title
        #[arg(long)]
        title: String,

        /// Collection (channel/feed) id
        #[arg(long)]
        collection: String,

        /// Collection display name (defaults to the id)
        #[arg(long)]
        collection_name: Option<String>,

        /// Declared duration in seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Process the item right away
        #[arg(long)]
        now: bool,
    },

    /// Show item counts and storage usage
    Status,

    /// List items
    List {
        /// Only items in this state (pending, fetching, fetched, transforming, completed, failed)
        #[arg(short, long)]
        state: Option<ItemState>,

        /// Maximum number of items to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show one item in detail
    Show {
        /// External item id
        id: String,
    },

    /// Move a failed item back to pending
    Requeue {
        /// External item id
        id: String,
    },

    /// Evict temp payloads (oldest first until under threshold)
    Cleanup {
        /// Remove every temp payload
        #[arg(long)]
        force: bool,
    },

    /// Show temp storage usage by file type
    Storage,

    /// Show recent journal events
    History {
        /// Maximum number of events to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Only events for this item
        #[arg(long)]
        item: Option<String>,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let cfg = config::config()?;

        match self.command {
            Commands::Cycle => run_cycle(cfg).await,
            Commands::Watch { interval } => watch(cfg, interval).await,
            Commands::Process { id } => process_item(cfg, &id).await,
            Commands::Add {
                url,
                id,
                title,
                collection,
                collection_name,
                duration,
                now,
            } => {
                let mut item = NewItem::new(id, title, url, collection);
                if let Some(name) = collection_name {
                    item = item.with_collection_name(name);
                }
                if let Some(seconds) = duration {
                    item = item.with_duration(seconds);
                }
                add_item(cfg, item, now).await
            }
            Commands::Status => show_status(cfg).await,
            Commands::List { state, limit } => list_items(cfg, state, limit).await,
            Commands::Show { id } => show_item(cfg, &id).await,
            Commands::Requeue { id } => requeue_item(cfg, &id).await,
            Commands::Cleanup { force } => cleanup(cfg, force).await,
            Commands::Storage => show_storage(cfg).await,
            Commands::History { limit, item } => show_history(cfg, limit, item).await,
            Commands::Config => show_config(cfg).await,
        }
    }
}

/// Exclusive advisory lock on `<home>/pipeline.lock`, released on drop
struct PipelineLock {
    _file: File,
}

impl PipelineLock {
    fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

        file.try_lock_exclusive().with_context(|| {
            format!(
                "Another tubescribe pipeline is already running (lock: {})",
                path.display()
            )
        })?;

        Ok(Self { _file: file })
    }
}

/// Wire up the orchestrator from configuration
async fn build_orchestrator(cfg: &ResolvedConfig) -> Result<Orchestrator> {
    cfg.ensure_dirs()?;

    let store = Arc::new(
        ItemStore::open(&cfg.database)
            .with_context(|| format!("Failed to open item store: {}", cfg.database.display()))?,
    );
    let quota = Arc::new(QuotaManager::new(
        &cfg.downloads,
        cfg.storage.temp_storage_ceiling_bytes,
    ));

    let retriever: Arc<dyn PayloadRetriever> = match cfg.fetch.backend {
        FetchBackend::YtDlp => Arc::new(YtDlpRetriever::new(&cfg.fetch.ytdlp_path)),
        FetchBackend::Http => Arc::new(HttpRetriever::new("mp3")),
    };
    let fetch = FetchStage::from_config(retriever, cfg);

    let t = &cfg.transform;
    let providers: Vec<Arc<dyn TranscriptionProvider>> = vec![
        Arc::new(
            WhisperXProvider::new(&t.whisperx_path, &t.whisperx_model)
                .with_device(&t.device, &t.compute_type)
                .with_language(t.language.clone()),
        ),
        Arc::new(WhisperProvider::new(&t.whisper_path, &t.whisper_model).with_language(t.language.clone())),
    ];
    let transform = TransformStage::new(providers, Arc::new(FileArtifactSink::new(&cfg.output)))
        .with_timeout(t.timeout());

    let discovery: Arc<dyn DiscoverySource> = match &cfg.manifest {
        Some(path) => Arc::new(ManifestDiscovery::new(path)),
        None => Arc::new(StaticDiscovery::default()),
    };

    let journal = Journal::open(cfg.journal_path()).await?;

    Ok(
        Orchestrator::new(store, quota, fetch, transform, discovery, journal)
            .retaining_failed_payloads(cfg.storage.retain_failed_payloads),
    )
}

fn open_store(cfg: &ResolvedConfig) -> Result<ItemStore> {
    ItemStore::open(&cfg.database)
        .with_context(|| format!("Failed to open item store: {}", cfg.database.display()))
}

/// Run one cycle
async fn run_cycle(cfg: &ResolvedConfig) -> Result<()> {
    let _lock = PipelineLock::acquire(&cfg.lock_path())?;
    let orchestrator = build_orchestrator(cfg).await?;

    let report = orchestrator.run_cycle().await?;
    print_cycle_report(&report);

    Ok(())
}

/// Run cycles until Ctrl+C
async fn watch(cfg: &ResolvedConfig, interval_minutes: Option<u64>) -> Result<()> {
    let _lock = PipelineLock::acquire(&cfg.lock_path())?;
    let orchestrator = build_orchestrator(cfg).await?;

    let interval = match interval_minutes {
        Some(minutes) => Duration::from_secs(minutes.max(1) * 60),
        None => cfg.schedule.interval(),
    };

    println!("👁️  Running every {} min", interval.as_secs() / 60);
    println!("    Press Ctrl+C to stop (a running cycle finishes first)");
    println!();

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        println!();
        println!("🛑 Stopping after the current cycle...");
        ctrl_c.cancel();
    });

    let summary = orchestrator.start_continuous(interval, cancel).await?;

    println!();
    println!("Cycles run:    {}", summary.cycles_run);
    println!("Failed cycles: {}", summary.failed_cycles);
    if summary.recovered > 0 {
        println!("Recovered:     {} interrupted item(s)", summary.recovered);
    }

    Ok(())
}

/// Process one item by id
async fn process_item(cfg: &ResolvedConfig, id: &str) -> Result<()> {
    let _lock = PipelineLock::acquire(&cfg.lock_path())?;
    let orchestrator = build_orchestrator(cfg).await?;

    let item = orchestrator
        .store()
        .get(id)?
        .with_context(|| format!("Item not found: {}", id))?;

    match item.state {
        ItemState::Pending => {}
        ItemState::Failed => anyhow::bail!(
            "Item {} failed earlier ({}). Run `tubescribe requeue {}` first",
            id,
            item.error.as_deref().unwrap_or("unknown error"),
            id
        ),
        other => anyhow::bail!("Item {} is {}, only pending items can be processed", id, other),
    }

    let outcome = orchestrator.process_one(&item).await?;
    print_item_outcome(&outcome);
    check_outcome(&outcome)
}

fn print_item_outcome(outcome: &ItemOutcome) {
    if outcome.success {
        println!("✅ {}", outcome.title);
        if let Some(language) = &outcome.language {
            println!("  Language:   {}", language);
        }
        if let Some(confidence) = outcome.confidence {
            println!("  Confidence: {:.2}", confidence);
        }
        if let Some(path) = &outcome.output_path {
            println!("  Output:     {}", path.display());
        }
        println!("  Time:       {:.1}s", outcome.timings.total_ms as f64 / 1000.0);
    } else {
        println!("❌ {}", outcome.title);
        println!(
            "  Error ({}): {}",
            outcome.error_kind.as_deref().unwrap_or("unknown"),
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
}

/// Turn an unsuccessful outcome into an error so the process exits non-zero
fn check_outcome(outcome: &ItemOutcome) -> Result<()> {
    if outcome.success {
        return Ok(());
    }
    anyhow::bail!(
        "Processing {} failed ({})",
        outcome.item_id,
        outcome.error_kind.as_deref().unwrap_or("unknown")
    )
}

/// Add an item by hand
async fn add_item(cfg: &ResolvedConfig, item: NewItem, process_now: bool) -> Result<()> {
    let _lock = if process_now {
        Some(PipelineLock::acquire(&cfg.lock_path())?)
    } else {
        None
    };
    let orchestrator = build_orchestrator(cfg).await?;

    let outcome = orchestrator.add_item(&item).await?;
    let stored = outcome.item();
    if outcome.is_new() {
        println!("✅ Added: {} [{}]", stored.title, stored.external_id);
    } else {
        println!(
            "ℹ️  Already known: {} [{}] ({})",
            stored.title, stored.external_id, stored.state
        );
    }

    if process_now && stored.state == ItemState::Pending {
        let result = orchestrator.process_one(stored).await?;
        if result.success {
            println!("✅ Processed in {:.1}s", result.timings.total_ms as f64 / 1000.0);
        } else {
            println!(
                "❌ Failed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

/// Show item counts and storage usage
async fn show_status(cfg: &ResolvedConfig) -> Result<()> {
    let orchestrator = build_orchestrator(cfg).await?;
    let status = orchestrator.status()?;

    println!();
    println!("Pipeline Status");
    println!("══════════════════════════════════════════════════════════════");
    println!();
    println!("Items:");
    println!("  Pending:      {}", status.counts.pending);
    println!("  Fetching:     {}", status.counts.fetching);
    println!("  Fetched:      {}", status.counts.fetched);
    println!("  Transforming: {}", status.counts.transforming);
    println!("  Completed:    {}", status.counts.completed);
    println!("  Failed:       {}", status.counts.failed);
    println!("  Total:        {}", status.counts.total());
    println!();
    println!("Temp storage:");
    println!(
        "  Used:      {} / {} ({:.1}%)",
        format_bytes(status.snapshot.used_bytes),
        format_bytes(status.snapshot.ceiling_bytes),
        status.snapshot.usage_ratio() * 100.0
    );
    println!("  Threshold: {}", format_bytes(status.threshold_bytes));
    println!("  Files:     {}", status.snapshot.file_count);
    println!();
    println!("Backends:");
    println!("  Fetch:      {}", status.retriever);
    println!("  Transcribe: {}", status.providers.join(" → "));
    println!();

    if status.snapshot.eviction_needed {
        println!("⚠️  Storage above threshold; the next cycle will evict old payloads");
    }
    if status.counts.in_flight() > 0 {
        println!("⚠️  Items in flight; if no pipeline is running they will be recovered on next `watch`");
    }

    Ok(())
}

/// List items
async fn list_items(cfg: &ResolvedConfig, state: Option<ItemState>, limit: usize) -> Result<()> {
    let store = open_store(cfg)?;

    let items = match state {
        Some(state) => store
            .list_by_state(state)?
            .into_iter()
            .take(limit)
            .collect::<Vec<_>>(),
        None => store.recent(limit)?,
    };

    if items.is_empty() {
        println!("No items found");
        return Ok(());
    }

    println!(
        "{:<16} {:<13} {:<40} {:<20} {:>8}",
        "ID", "STATE", "TITLE", "COLLECTION", "DURATION"
    );
    println!("{}", "-".repeat(101));

    for item in items {
        println!(
            "{:<16} {:<13} {:<40} {:<20} {:>8}",
            truncate(&item.external_id, 16),
            item.state.as_str(),
            truncate(&item.title, 40),
            truncate(item.collection_label(), 20),
            item.duration_label()
        );
    }

    Ok(())
}

/// Show one item
async fn show_item(cfg: &ResolvedConfig, id: &str) -> Result<()> {
    let store = open_store(cfg)?;
    let item = store
        .get(id)?
        .with_context(|| format!("Item not found: {}", id))?;

    println!("ID:          {}", item.external_id);
    println!("Title:       {}", item.title);
    println!("URL:         {}", item.source_url);
    println!("Collection:  {} ({})", item.collection_label(), item.collection_id);
    println!("Duration:    {}", item.duration_label());
    println!("State:       {}", item.state);
    println!("Retries:     {}", item.retry_count);
    println!("Discovered:  {}", item.discovered_at);
    if let Some(at) = item.fetched_at {
        println!("Fetched:     {}", at);
    }
    if let Some(at) = item.completed_at {
        println!("Completed:   {}", at);
    }
    if let Some(path) = &item.payload_path {
        println!("Payload:     {}", path.display());
    }
    if let Some(path) = &item.output_path {
        println!("Output:      {}", path.display());
    }
    if let Some(error) = &item.error {
        println!(
            "Error:       [{}] {}",
            item.error_kind.as_deref().unwrap_or("unknown"),
            error
        );
    }

    if let Some(result) = store.result(id)? {
        println!();
        println!("Transcription:");
        println!("  Provider:   {} ({})", result.provider, result.model);
        println!("  Language:   {}", result.language);
        println!("  Confidence: {:.2}", result.confidence);
        println!("  Words:      {}", result.word_count());
        println!("  Segments:   {}", result.segments.len());
        println!("  Speakers:   {}", describe_speakers(&result.speakers));
        println!("  Took:       {:.1}s", result.processing_seconds);
    }

    Ok(())
}

/// Move a failed item back to pending
async fn requeue_item(cfg: &ResolvedConfig, id: &str) -> Result<()> {
    let orchestrator = build_orchestrator(cfg).await?;
    let item = orchestrator
        .requeue(id)
        .await
        .with_context(|| format!("Could not requeue {}", id))?;

    println!("✅ Requeued: {} (attempts so far: {})", item.title, item.retry_count);
    Ok(())
}

/// Evict temp payloads
async fn cleanup(cfg: &ResolvedConfig, force: bool) -> Result<()> {
    let _lock = PipelineLock::acquire(&cfg.lock_path())?;
    let orchestrator = build_orchestrator(cfg).await?;

    let report = if force {
        orchestrator.emergency_cleanup().await?
    } else {
        orchestrator.quota().evict_until_under_threshold(false).await?
    };

    if report.files_removed == 0 {
        println!("ℹ️  Nothing to remove");
    } else {
        println!(
            "🧹 Removed {} file(s), freed {}",
            report.files_removed,
            format_bytes(report.bytes_freed)
        );
    }
    println!("   Remaining: {}", format_bytes(report.remaining_bytes));
    for error in &report.errors {
        println!("   ⚠️  {}", error);
    }

    Ok(())
}

/// Show temp storage usage
async fn show_storage(cfg: &ResolvedConfig) -> Result<()> {
    let quota = QuotaManager::new(&cfg.downloads, cfg.storage.temp_storage_ceiling_bytes);
    let snapshot = quota.snapshot()?;
    print_snapshot(&snapshot, quota.threshold_bytes());
    Ok(())
}

/// Show recent journal events
async fn show_history(cfg: &ResolvedConfig, limit: usize, item: Option<String>) -> Result<()> {
    let journal = Journal::open(cfg.journal_path()).await?;

    let events = match &item {
        Some(id) => {
            let mut events = journal.item_history(id).await?;
            let skip = events.len().saturating_sub(limit);
            events.split_off(skip)
        }
        None => journal.recent(limit).await?,
    };

    if events.is_empty() {
        println!("No events recorded");
        return Ok(());
    }

    for event in events {
        let item = event.item_id.as_deref().unwrap_or("-");
        let event_type = serde_json::to_value(event.event_type)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        print!(
            "{}  {:<18} {:<16} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event_type,
            truncate(item, 16),
            event.summary
        );
        if let Some(error) = &event.error {
            print!("  ({})", error);
        }
        println!();
    }

    Ok(())
}

/// Show resolved configuration
async fn show_config(cfg: &ResolvedConfig) -> Result<()> {
    println!("╔═══════════════════════════════════════════════════════════════╗");
    println!("  tubescribe Configuration");
    println!("╚═══════════════════════════════════════════════════════════════╝");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:      {}", cfg.home.display());
    println!("  Downloads: {}", cfg.downloads.display());
    println!("  Output:    {}", cfg.output.display());
    println!("  Database:  {}", cfg.database.display());
    println!("  Journal:   {}", cfg.journal_path().display());
    println!(
        "  Manifest:  {}",
        cfg.manifest
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );
    println!();
    println!("Storage:");
    println!("  Ceiling:         {}", format_bytes(cfg.storage.temp_storage_ceiling_bytes));
    println!("  Per-item max:    {}", format_bytes(cfg.storage.per_item_max_bytes));
    println!("  Max duration:    {} min", cfg.storage.max_duration_seconds / 60);
    println!("  Retain failures: {}", cfg.storage.retain_failed_payloads);
    println!();
    println!("Schedule:");
    println!("  Interval: {} min", cfg.schedule.check_interval_minutes);
    println!();
    println!("Fetch:");
    println!("  Backend: {:?}", cfg.fetch.backend);
    println!("  Timeout: {}s", cfg.fetch.timeout_seconds);
    println!();
    println!("Transform:");
    println!("  WhisperX: {} ({})", cfg.transform.whisperx_path, cfg.transform.whisperx_model);
    println!("  Whisper:  {} ({})", cfg.transform.whisper_path, cfg.transform.whisper_model);
    println!("  Device:   {} / {}", cfg.transform.device, cfg.transform.compute_type);
    println!(
        "  Language: {}",
        cfg.transform.language.as_deref().unwrap_or("auto")
    );
    println!("  Timeout:  {}s", cfg.transform.timeout_seconds);

    Ok(())
}

fn print_cycle_report(report: &CycleReport) {
    println!();
    println!("Cycle {}", report.cycle_id);
    println!("══════════════════════════════════════════════════════════════");
    println!("  Discovered: {}", report.discovered);
    println!("  Processed:  {}", report.processed);
    println!("  Successful: {}", report.successful);
    println!("  Failed:     {}", report.failed);
    println!("  Time:       {:.1}s", report.elapsed().as_secs_f64());

    if let Some(error) = &report.discovery_error {
        println!();
        println!("⚠️  Discovery failed: {}", error);
    }

    if !report.errors.is_empty() {
        println!();
        println!("Errors:");
        for error in &report.errors {
            println!("  {} [{}]: {}", error.item_id, error.kind, error.error);
        }
    }

    let freed: u64 = report.evictions.iter().map(|e| e.bytes_freed).sum();
    if freed > 0 {
        println!();
        println!("🧹 Evicted {} during cycle", format_bytes(freed));
    }

    println!();
    println!(
        "Temp storage: {} / {} ({:.1}%)",
        format_bytes(report.snapshot.used_bytes),
        format_bytes(report.snapshot.ceiling_bytes),
        report.snapshot.usage_ratio() * 100.0
    );
}

fn print_snapshot(snapshot: &StorageSnapshot, threshold_bytes: u64) {
    println!();
    println!("Temp Storage: {}", snapshot.root.display());
    println!("══════════════════════════════════════════════════════════════");
    println!(
        "  Used:      {} / {} ({:.1}%)",
        format_bytes(snapshot.used_bytes),
        format_bytes(snapshot.ceiling_bytes),
        snapshot.usage_ratio() * 100.0
    );
    println!("  Threshold: {}", format_bytes(threshold_bytes));
    println!("  Files:     {}", snapshot.file_count);

    if !snapshot.by_extension.is_empty() {
        println!();
        println!("  {:<10} {:>6} {:>12}", "TYPE", "FILES", "SIZE");
        for (ext, usage) in &snapshot.by_extension {
            let label = if ext.is_empty() { "(none)" } else { ext.as_str() };
            println!("  {:<10} {:>6} {:>12}", label, usage.count, format_bytes(usage.bytes));
        }
    }

    if snapshot.eviction_needed {
        println!();
        println!("⚠️  Above threshold. Run `tubescribe cleanup` to evict old payloads");
    }
}

fn describe_speakers(speakers: &crate::domain::SpeakerInfo) -> String {
    match speakers {
        crate::domain::SpeakerInfo::Present { speakers } => {
            format!("{} ({})", speakers.len(), speakers.join(", "))
        }
        crate::domain::SpeakerInfo::Absent { reason } => format!("none ({})", reason),
    }
}

/// Human-readable byte count
fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= KIB * KIB * KIB {
        format!("{:.2} GB", b / (KIB * KIB * KIB))
    } else if b >= KIB * KIB {
        format!("{:.1} MB", b / (KIB * KIB))
    } else if b >= KIB {
        format!("{:.1} KB", b / KIB)
    } else {
        format!("{} B", bytes)
    }
}

/// Truncate a string to max length with ellipsis
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}
