//! Main orchestrator for pipeline execution.
//!
//! Drives items through `Pending → Fetching → Fetched → Transforming →
//! Completed`, one at a time, keeping temp storage under its ceiling.
//! The orchestrator is the only component that changes item state; the
//! stages report back and it performs the transition and the journal write.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::journal::{Journal, JournalError};
use super::report::{BatchReport, ContinuousSummary, CycleReport, ItemOutcome, PipelineStatus};
use crate::discovery::DiscoverySource;
use crate::domain::{EventType, ItemState, NewItem, PipelineEvent, WorkItem};
use crate::fetch::FetchStage;
use crate::storage::{EvictionReport, QuotaError, QuotaManager};
use crate::store::{ItemStore, PutOutcome, StoreError, TransitionUpdate};
use crate::transform::TransformStage;

/// Errors that abort a batch or cycle.
///
/// Anything that goes wrong with a single item is recorded on the item
/// instead and never surfaces here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Item store failure: {0}")]
    Store(#[from] StoreError),

    #[error("Storage failure: {0}")]
    Quota(#[from] QuotaError),

    #[error("Journal failure: {0}")]
    Journal(#[from] JournalError),
}

/// Main pipeline orchestrator
pub struct Orchestrator {
    store: Arc<ItemStore>,
    quota: Arc<QuotaManager>,
    fetch: FetchStage,
    transform: TransformStage,
    discovery: Arc<dyn DiscoverySource>,
    journal: Journal,
    retain_failed_payloads: bool,
}

impl Orchestrator {
    pub fn new(
        store: Arc<ItemStore>,
        quota: Arc<QuotaManager>,
        fetch: FetchStage,
        transform: TransformStage,
        discovery: Arc<dyn DiscoverySource>,
        journal: Journal,
    ) -> Self {
        Self {
            store,
            quota,
            fetch,
            transform,
            discovery,
            journal,
            retain_failed_payloads: false,
        }
    }

    /// Keep the payload of an item whose transform failed
    pub fn retaining_failed_payloads(mut self, retain: bool) -> Self {
        self.retain_failed_payloads = retain;
        self
    }

    pub fn store(&self) -> &ItemStore {
        &self.store
    }

    pub fn quota(&self) -> &QuotaManager {
        &self.quota
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Process one pending item end-to-end.
    ///
    /// Item-level failures become a `Failed` transition and an unsuccessful
    /// outcome. An item that is no longer `Pending` in the store is skipped
    /// with an `invalid_state` outcome. Only store, quota, or journal
    /// failures return `Err`.
    #[instrument(skip_all, fields(item_id = %item.external_id))]
    pub async fn process_one(&self, item: &WorkItem) -> Result<ItemOutcome, PipelineError> {
        self.process_item(item, None).await
    }

    /// Process the items in order, one at a time
    #[instrument(skip_all, fields(items = items.len()))]
    pub async fn process_batch(&self, items: &[WorkItem]) -> Result<BatchReport, PipelineError> {
        self.run_batch(items, None).await
    }

    /// Discover, store, and process everything pending.
    ///
    /// A discovery failure is recorded in the report; items already pending
    /// are still processed.
    #[instrument(skip_all)]
    pub async fn run_cycle(&self) -> Result<CycleReport, PipelineError> {
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        info!(%cycle_id, "Starting cycle");

        self.record(
            PipelineEvent::new(EventType::CycleStarted, format!("Cycle {} started", cycle_id))
                .in_cycle(Some(cycle_id)),
        )
        .await?;

        let mut discovered = 0;
        let mut discovery_error = None;
        match self.discovery.discover_new_items().await {
            Ok(items) => {
                debug!(source = self.discovery.name(), count = items.len(), "Discovery returned items");
                for new_item in &items {
                    if self.store_discovered(new_item, Some(cycle_id)).await?.is_new() {
                        discovered += 1;
                    }
                }
            }
            Err(e) => {
                warn!(%cycle_id, source = self.discovery.name(), error = %e, "Discovery failed");
                self.record(
                    PipelineEvent::new(EventType::DiscoveryFailed, "Discovery failed")
                        .in_cycle(Some(cycle_id))
                        .with_error(e.to_string()),
                )
                .await?;
                discovery_error = Some(e.to_string());
            }
        }

        let pending = self.store.list_by_state(ItemState::Pending)?;
        let batch = self.run_batch(&pending, Some(cycle_id)).await?;

        let mut evictions = batch.evictions.clone();
        if let Some(report) = self.ensure_headroom(Some(cycle_id)).await? {
            evictions.push(report);
        }

        let snapshot = self.quota.snapshot()?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let report = CycleReport {
            cycle_id,
            started_at,
            discovered,
            processed: batch.total,
            successful: batch.successful,
            failed: batch.failed,
            errors: batch.errors(),
            evictions,
            discovery_error,
            snapshot,
            elapsed_ms,
        };

        self.record(
            PipelineEvent::new(
                EventType::CycleCompleted,
                format!(
                    "Cycle finished: {} discovered, {} processed, {} ok, {} failed",
                    report.discovered, report.processed, report.successful, report.failed
                ),
            )
            .in_cycle(Some(cycle_id))
            .with_duration(elapsed_ms)
            .with_bytes(report.snapshot.used_bytes),
        )
        .await?;

        info!(
            %cycle_id,
            discovered = report.discovered,
            processed = report.processed,
            successful = report.successful,
            failed = report.failed,
            elapsed_ms,
            "Cycle completed"
        );

        Ok(report)
    }

    /// Run cycles every `interval` until `cancel` fires.
    ///
    /// Items a previous process left mid-flight are failed first. A cycle
    /// that is running when cancellation arrives is allowed to finish; a
    /// cycle that fails outright is logged and the loop keeps going.
    pub async fn start_continuous(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Result<ContinuousSummary, PipelineError> {
        let mut summary = ContinuousSummary {
            recovered: self.recover_interrupted().await?,
            ..ContinuousSummary::default()
        };

        info!(interval_secs = interval.as_secs(), "Continuous mode started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            summary.cycles_run += 1;
            if let Err(e) = self.run_cycle().await {
                summary.failed_cycles += 1;
                error!(error = %e, "Cycle failed");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!(
            cycles = summary.cycles_run,
            failed = summary.failed_cycles,
            "Continuous mode stopped"
        );
        Ok(summary)
    }

    /// Delete every temp payload regardless of age
    #[instrument(skip_all)]
    pub async fn emergency_cleanup(&self) -> Result<EvictionReport, PipelineError> {
        warn!("Emergency cleanup: removing all temporary payloads");
        let report = self.quota.evict_until_under_threshold(true).await?;

        self.record(
            PipelineEvent::new(
                EventType::EmergencyCleanup,
                format!("Emergency cleanup removed {} files", report.files_removed),
            )
            .with_bytes(report.bytes_freed),
        )
        .await?;

        Ok(report)
    }

    /// Fail items stuck in `Fetching`, `Fetched`, or `Transforming` and drop
    /// their payloads. Returns how many items were recovered.
    pub async fn recover_interrupted(&self) -> Result<usize, PipelineError> {
        let stuck = self.store.recover_interrupted()?;

        for item in &stuck {
            let path = item
                .payload_path
                .clone()
                .unwrap_or_else(|| self.fetch.payload_path_for(item));
            if let Err(e) = self.quota.remove_payload(&path).await {
                warn!(item_id = %item.external_id, error = %e, "Could not remove interrupted payload");
            }

            self.record(
                PipelineEvent::new(
                    EventType::ItemInterrupted,
                    format!("Recovered item interrupted while {}", item.state),
                )
                .for_item(&item.external_id),
            )
            .await?;
        }

        if !stuck.is_empty() {
            warn!(count = stuck.len(), "Recovered interrupted items");
        }
        Ok(stuck.len())
    }

    /// Put a failed item back in the queue
    pub async fn requeue(&self, id: &str) -> Result<WorkItem, PipelineError> {
        let item = self.store.requeue(id)?;
        info!(item_id = %id, retry_count = item.retry_count, "Item requeued");

        self.record(
            PipelineEvent::new(EventType::ItemRequeued, format!("Requeued: {}", item.title))
                .for_item(id),
        )
        .await?;
        Ok(item)
    }

    /// Store a single item outside of discovery
    pub async fn add_item(&self, new_item: &NewItem) -> Result<PutOutcome, PipelineError> {
        self.store_discovered(new_item, None).await
    }

    /// Item counts, storage, and configured backends
    pub fn status(&self) -> Result<PipelineStatus, PipelineError> {
        Ok(PipelineStatus {
            counts: self.store.counts()?,
            snapshot: self.quota.snapshot()?,
            retriever: self.fetch.retriever_name().to_string(),
            providers: self
                .transform
                .provider_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            threshold_bytes: self.quota.threshold_bytes(),
        })
    }

    async fn store_discovered(
        &self,
        new_item: &NewItem,
        cycle_id: Option<Uuid>,
    ) -> Result<PutOutcome, PipelineError> {
        let outcome = self.store.put(new_item)?;
        if outcome.is_new() {
            debug!(item_id = %new_item.external_id, "New item discovered");
            self.record(
                PipelineEvent::new(
                    EventType::ItemDiscovered,
                    format!("Discovered: {}", new_item.title),
                )
                .for_item(&new_item.external_id)
                .in_cycle(cycle_id),
            )
            .await?;
        }
        Ok(outcome)
    }

    async fn run_batch(
        &self,
        items: &[WorkItem],
        cycle_id: Option<Uuid>,
    ) -> Result<BatchReport, PipelineError> {
        let started = Instant::now();
        let mut report = BatchReport::default();

        if items.is_empty() {
            return Ok(report);
        }

        info!(count = items.len(), "Processing batch");
        if let Some(eviction) = self.ensure_headroom(cycle_id).await? {
            report.evictions.push(eviction);
        }

        for (index, item) in items.iter().enumerate() {
            debug!(item_id = %item.external_id, position = index + 1, total = items.len(), "Next item");
            let outcome = self.process_item(item, cycle_id).await?;
            report.record(outcome);
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            "Batch finished"
        );
        Ok(report)
    }

    async fn process_item(
        &self,
        item: &WorkItem,
        cycle_id: Option<Uuid>,
    ) -> Result<ItemOutcome, PipelineError> {
        let started = Instant::now();
        let id = item.external_id.as_str();
        let mut outcome = ItemOutcome::new(id, &item.title);

        // The caller's snapshot may be stale: duplicates in a batch, or an
        // item another run already picked up
        let current = self.store.get(id)?.map(|stored| stored.state);
        if current != Some(ItemState::Pending) {
            let message = match current {
                Some(state) => format!("Item {} is {}, not pending", id, state),
                None => format!("Item {} is not in the store", id),
            };
            warn!(item_id = %id, "Skipping item: {}", message);
            outcome = outcome.failed("invalid_state", message);
            outcome.timings.total_ms = started.elapsed().as_millis() as u64;
            return Ok(outcome);
        }

        if let Some(eviction) = self.ensure_headroom(cycle_id).await? {
            outcome.evictions.push(eviction);
        }

        // Fetch
        let fetching = self
            .store
            .transition(id, ItemState::Fetching, TransitionUpdate::none())?;
        info!(item_id = %id, title = %item.title, "Fetching");

        let fetched = match self.fetch.fetch(&fetching).await {
            Ok(fetched) => fetched,
            Err(e) => {
                let kind = e.kind();
                let message = e.to_string();
                self.fail_item(id, cycle_id, "fetch", kind, &message, None).await?;
                outcome = outcome.failed(kind, message);
                outcome.timings.total_ms = started.elapsed().as_millis() as u64;
                return Ok(outcome);
            }
        };

        outcome.timings.fetch_ms = Some(fetched.elapsed.as_millis() as u64);
        outcome.payload_bytes = Some(fetched.bytes);

        self.store.transition(
            id,
            ItemState::Fetched,
            TransitionUpdate::fetched(&fetched.payload_path),
        )?;
        self.record_in_flight(
            PipelineEvent::new(EventType::ItemFetched, format!("Fetched: {}", item.title))
                .for_item(id)
                .in_cycle(cycle_id)
                .with_duration(fetched.elapsed.as_millis() as u64)
                .with_bytes(fetched.bytes),
        )
        .await;

        // Transform
        let transforming =
            self.store
                .transition(id, ItemState::Transforming, TransitionUpdate::none())?;
        info!(item_id = %id, "Transforming");

        let transformed = match self
            .transform
            .transform(&transforming, &fetched.payload_path)
            .await
        {
            Ok(transformed) => transformed,
            Err(e) => {
                let kind = e.kind();
                let message = e.to_string();
                self.fail_item(
                    id,
                    cycle_id,
                    "transform",
                    kind,
                    &message,
                    Some(&fetched.payload_path),
                )
                .await?;
                outcome = outcome.failed(kind, message);
                outcome.timings.total_ms = started.elapsed().as_millis() as u64;
                return Ok(outcome);
            }
        };

        outcome.timings.transform_ms = Some(transformed.elapsed.as_millis() as u64);
        outcome.language = Some(transformed.result.language.clone());
        outcome.confidence = Some(transformed.result.confidence);
        outcome.output_path = Some(transformed.output_path.clone());

        self.store.transition(
            id,
            ItemState::Completed,
            TransitionUpdate::completed(&transformed.output_path, transformed.result),
        )?;
        let bytes_freed = self.release_payload(id, &fetched.payload_path).await;

        let total_ms = started.elapsed().as_millis() as u64;
        self.record(
            PipelineEvent::new(EventType::ItemCompleted, format!("Completed: {}", item.title))
                .for_item(id)
                .in_cycle(cycle_id)
                .with_duration(total_ms)
                .with_bytes(bytes_freed),
        )
        .await?;

        if let Some(eviction) = self.ensure_headroom(cycle_id).await? {
            outcome.evictions.push(eviction);
        }

        outcome.success = true;
        outcome.timings.total_ms = total_ms;
        info!(item_id = %id, total_ms, "Item completed");
        Ok(outcome)
    }

    /// Commit `Failed`, then drop the payload unless it is being kept
    async fn fail_item(
        &self,
        id: &str,
        cycle_id: Option<Uuid>,
        stage: &str,
        kind: &str,
        message: &str,
        payload: Option<&Path>,
    ) -> Result<(), PipelineError> {
        warn!(item_id = %id, stage, kind, error = %message, "Item failed");

        let retained = match payload {
            Some(path) if self.retain_failed_payloads => {
                match tokio::fs::try_exists(path).await {
                    Ok(true) => Some(path.to_path_buf()),
                    _ => None,
                }
            }
            _ => None,
        };

        self.store.transition(
            id,
            ItemState::Failed,
            TransitionUpdate::failed(kind, message).retaining_payload(retained.clone()),
        )?;

        if let (Some(path), None) = (payload, retained) {
            self.release_payload(id, path).await;
        }

        self.record(
            PipelineEvent::new(EventType::ItemFailed, format!("Failed during {}", stage))
                .for_item(id)
                .in_cycle(cycle_id)
                .with_error(format!("{}: {}", kind, message)),
        )
        .await
    }

    /// Delete a payload whose item outcome is already committed.
    /// Returns the bytes freed.
    async fn release_payload(&self, id: &str, path: &Path) -> u64 {
        match self.quota.remove_payload(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                // Left for the next eviction pass
                warn!(item_id = %id, path = %path.display(), error = %e, "Failed to delete payload");
                0
            }
        }
    }

    async fn ensure_headroom(
        &self,
        cycle_id: Option<Uuid>,
    ) -> Result<Option<EvictionReport>, PipelineError> {
        let Some(report) = self.quota.ensure_headroom().await? else {
            return Ok(None);
        };

        self.record(
            PipelineEvent::new(
                EventType::Eviction,
                format!("Evicted {} files", report.files_removed),
            )
            .in_cycle(cycle_id)
            .with_bytes(report.bytes_freed),
        )
        .await?;

        Ok(Some(report))
    }

    async fn record(&self, event: PipelineEvent) -> Result<(), PipelineError> {
        self.journal.append(&event).await?;
        Ok(())
    }

    /// Journal an event between two transitions of the same item.
    /// Errors are logged only; the item keeps moving.
    async fn record_in_flight(&self, event: PipelineEvent) {
        if let Err(e) = self.journal.append(&event).await {
            error!(
                item_id = event.item_id.as_deref().unwrap_or(""),
                event = ?event.event_type,
                error = %e,
                "Failed to journal event"
            );
        }
    }
}
