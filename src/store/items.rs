//! SQLite-backed item store.
//!
//! Holds every discovered work item and its transcription result. The
//! connection sits behind a mutex and every multi-column update runs in a
//! transaction, so readers never see a half-applied transition.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{ItemState, NewItem, SpeakerInfo, TransformResult, WorkItem};

/// Errors that can occur with the item store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition for {id}: {from} → {to}")]
    InvalidTransition {
        id: String,
        from: ItemState,
        to: ItemState,
    },

    #[error("Transition to {state} requires {field}")]
    MissingField {
        state: ItemState,
        field: &'static str,
    },

    #[error("Corrupt record for {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Item store lock poisoned")]
    Poisoned,
}

/// Extra data recorded alongside a state transition
#[derive(Debug, Clone, Default)]
pub struct TransitionUpdate {
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub payload_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub result: Option<TransformResult>,
}

impl TransitionUpdate {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn failed(kind: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            error_kind: Some(kind.into()),
            ..Self::default()
        }
    }

    pub fn fetched(payload_path: impl Into<PathBuf>) -> Self {
        Self {
            payload_path: Some(payload_path.into()),
            ..Self::default()
        }
    }

    pub fn completed(output_path: impl Into<PathBuf>, result: TransformResult) -> Self {
        Self {
            output_path: Some(output_path.into()),
            result: Some(result),
            ..Self::default()
        }
    }

    /// Keep a payload path on a failed item (retained for debugging)
    pub fn retaining_payload(mut self, payload_path: Option<PathBuf>) -> Self {
        self.payload_path = payload_path;
        self
    }
}

/// Result of putting a discovered item
#[derive(Debug, Clone)]
pub enum PutOutcome {
    /// New item stored as pending
    Inserted(WorkItem),

    /// Item was already known; the stored record is returned untouched
    Existing(WorkItem),
}

impl PutOutcome {
    pub fn item(&self) -> &WorkItem {
        match self {
            Self::Inserted(item) | Self::Existing(item) => item,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Number of items per state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub pending: usize,
    pub fetching: usize,
    pub fetched: usize,
    pub transforming: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.pending + self.fetching + self.fetched + self.transforming + self.completed + self.failed
    }

    /// Items between `Pending` and a terminal state
    pub fn in_flight(&self) -> usize {
        ItemState::ALL
            .into_iter()
            .filter(|state| state.is_transient())
            .map(|state| self.get(state))
            .sum()
    }

    pub fn get(&self, state: ItemState) -> usize {
        match state {
            ItemState::Pending => self.pending,
            ItemState::Fetching => self.fetching,
            ItemState::Fetched => self.fetched,
            ItemState::Transforming => self.transforming,
            ItemState::Completed => self.completed,
            ItemState::Failed => self.failed,
        }
    }

    fn slot(&mut self, state: ItemState) -> &mut usize {
        match state {
            ItemState::Pending => &mut self.pending,
            ItemState::Fetching => &mut self.fetching,
            ItemState::Fetched => &mut self.fetched,
            ItemState::Transforming => &mut self.transforming,
            ItemState::Completed => &mut self.completed,
            ItemState::Failed => &mut self.failed,
        }
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS items (
    seq              INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id      TEXT NOT NULL UNIQUE,
    collection_id    TEXT NOT NULL,
    collection_name  TEXT NOT NULL,
    title            TEXT NOT NULL,
    source_url       TEXT NOT NULL,
    duration_seconds INTEGER,
    state            TEXT NOT NULL,
    payload_path     TEXT,
    output_path      TEXT,
    discovered_at    TEXT NOT NULL,
    fetched_at       TEXT,
    completed_at     TEXT,
    updated_at       TEXT NOT NULL,
    error            TEXT,
    error_kind       TEXT,
    retry_count      INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_items_state ON items(state, discovered_at, seq);

CREATE TABLE IF NOT EXISTS results (
    external_id        TEXT PRIMARY KEY REFERENCES items(external_id),
    text               TEXT NOT NULL,
    segments_json      TEXT NOT NULL,
    language           TEXT NOT NULL,
    confidence         REAL NOT NULL,
    speakers_json      TEXT NOT NULL,
    processing_seconds REAL NOT NULL,
    provider           TEXT NOT NULL,
    model              TEXT NOT NULL,
    created_at         TEXT NOT NULL
);
";

const ITEM_COLUMNS: &str = "external_id, collection_id, collection_name, title, source_url, \
     duration_seconds, state, payload_path, output_path, discovered_at, fetched_at, \
     completed_at, updated_at, error, error_kind, retry_count";

/// Durable store of work items
pub struct ItemStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for ItemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemStore").finish_non_exhaustive()
    }
}

impl ItemStore {
    /// Open (or create) the store at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::bootstrap(conn)
    }

    /// Open a throwaway in-memory store
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Insert a discovered item, or return the existing record (idempotent)
    pub fn put(&self, item: &NewItem) -> Result<PutOutcome, StoreError> {
        let conn = self.lock()?;
        let now = timestamp(Utc::now());

        let inserted = conn.execute(
            "INSERT INTO items (external_id, collection_id, collection_name, title, source_url,
                                duration_seconds, state, discovered_at, updated_at, retry_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, 0)
             ON CONFLICT(external_id) DO NOTHING",
            params![
                item.external_id,
                item.collection_id,
                item.collection_name,
                item.title,
                item.source_url,
                item.duration_seconds.map(|d| d as i64),
                ItemState::Pending.as_str(),
                now,
            ],
        )?;

        let stored = fetch_item(&conn, &item.external_id)?
            .ok_or_else(|| StoreError::NotFound(item.external_id.clone()))?;

        if inserted == 1 {
            debug!(item_id = %item.external_id, "Item stored");
            Ok(PutOutcome::Inserted(stored))
        } else {
            Ok(PutOutcome::Existing(stored))
        }
    }

    /// Get a specific item by external id
    pub fn get(&self, id: &str) -> Result<Option<WorkItem>, StoreError> {
        let conn = self.lock()?;
        fetch_item(&conn, id)
    }

    /// All items in `state`, oldest-discovered first
    pub fn list_by_state(&self, state: ItemState) -> Result<Vec<WorkItem>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM items WHERE state = ?1 ORDER BY discovered_at ASC, seq ASC",
            ITEM_COLUMNS
        );
        query_items(&conn, &sql, params![state.as_str()])
    }

    /// Most recently updated items (newest first)
    pub fn recent(&self, limit: usize) -> Result<Vec<WorkItem>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM items ORDER BY updated_at DESC, seq DESC LIMIT ?1",
            ITEM_COLUMNS
        );
        query_items(&conn, &sql, params![limit as i64])
    }

    /// Move an item to `next`, recording the data that goes with the new state
    pub fn transition(
        &self,
        id: &str,
        next: ItemState,
        update: TransitionUpdate,
    ) -> Result<WorkItem, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let current = current_state(&tx, id)?;
        if !current.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: current,
                to: next,
            });
        }

        let now = timestamp(Utc::now());
        match next {
            ItemState::Fetched => {
                let payload = update.payload_path.ok_or(StoreError::MissingField {
                    state: next,
                    field: "payload_path",
                })?;
                tx.execute(
                    "UPDATE items SET state = ?2, payload_path = ?3, fetched_at = ?4, updated_at = ?4
                     WHERE external_id = ?1",
                    params![id, next.as_str(), path_text(&payload), now],
                )?;
            }
            ItemState::Completed => {
                let output = update.output_path.ok_or(StoreError::MissingField {
                    state: next,
                    field: "output_path",
                })?;
                let result = update.result.ok_or(StoreError::MissingField {
                    state: next,
                    field: "result",
                })?;

                tx.execute(
                    "INSERT OR REPLACE INTO results (external_id, text, segments_json, language,
                         confidence, speakers_json, processing_seconds, provider, model, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        id,
                        result.text,
                        serde_json::to_string(&result.segments)?,
                        result.language,
                        result.confidence,
                        serde_json::to_string(&result.speakers)?,
                        result.processing_seconds,
                        result.provider,
                        result.model,
                        now,
                    ],
                )?;
                tx.execute(
                    "UPDATE items SET state = ?2, output_path = ?3, payload_path = NULL,
                         completed_at = ?4, updated_at = ?4, error = NULL, error_kind = NULL
                     WHERE external_id = ?1",
                    params![id, next.as_str(), path_text(&output), now],
                )?;
            }
            ItemState::Failed => {
                tx.execute(
                    "UPDATE items SET state = ?2, error = ?3, error_kind = ?4, payload_path = ?5,
                         retry_count = retry_count + 1, updated_at = ?6
                     WHERE external_id = ?1",
                    params![
                        id,
                        next.as_str(),
                        update.error.unwrap_or_else(|| "unknown error".to_string()),
                        update.error_kind,
                        update.payload_path.as_deref().map(path_text),
                        now,
                    ],
                )?;
            }
            ItemState::Pending | ItemState::Fetching | ItemState::Transforming => {
                tx.execute(
                    "UPDATE items SET state = ?2, updated_at = ?3 WHERE external_id = ?1",
                    params![id, next.as_str(), now],
                )?;
            }
        }

        let item = fetch_item(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        tx.commit()?;

        debug!(item_id = %id, from = %current, to = %next, "Item transitioned");
        Ok(item)
    }

    /// Explicitly put a failed item back in the queue.
    ///
    /// The retry count is kept: it counts failures, not requeues.
    pub fn requeue(&self, id: &str) -> Result<WorkItem, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let current = current_state(&tx, id)?;
        if !current.can_requeue() {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: current,
                to: ItemState::Pending,
            });
        }

        tx.execute(
            "UPDATE items SET state = ?2, error = NULL, error_kind = NULL, payload_path = NULL,
                 fetched_at = NULL, updated_at = ?3
             WHERE external_id = ?1",
            params![id, ItemState::Pending.as_str(), timestamp(Utc::now())],
        )?;

        let item = fetch_item(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        tx.commit()?;
        Ok(item)
    }

    /// Fail every item a previous process left in `Fetching`, `Fetched`, or
    /// `Transforming`.
    ///
    /// Returns the items as they were before recovery (with their payload
    /// paths, so the caller can clean up).
    pub fn recover_interrupted(&self) -> Result<Vec<WorkItem>, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let sql = format!(
            "SELECT {} FROM items WHERE state IN (?1, ?2, ?3) ORDER BY discovered_at ASC, seq ASC",
            ITEM_COLUMNS
        );
        let stuck = query_items(
            &tx,
            &sql,
            params![
                ItemState::Fetching.as_str(),
                ItemState::Fetched.as_str(),
                ItemState::Transforming.as_str()
            ],
        )?;

        let now = timestamp(Utc::now());
        for item in &stuck {
            warn!(item_id = %item.external_id, state = %item.state, "Recovering interrupted item");
            tx.execute(
                "UPDATE items SET state = ?2, error = ?3, error_kind = 'interrupted',
                     payload_path = NULL, retry_count = retry_count + 1, updated_at = ?4
                 WHERE external_id = ?1",
                params![
                    item.external_id,
                    ItemState::Failed.as_str(),
                    format!("Interrupted while {}", item.state),
                    now,
                ],
            )?;
        }

        tx.commit()?;
        Ok(stuck)
    }

    /// Transcription result for a completed item
    pub fn result(&self, id: &str) -> Result<Option<TransformResult>, StoreError> {
        let conn = self.lock()?;

        let raw = conn
            .query_row(
                "SELECT text, segments_json, language, confidence, speakers_json,
                        processing_seconds, provider, model
                 FROM results WHERE external_id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((text, segments, language, confidence, speakers, secs, provider, model)) = raw
        else {
            return Ok(None);
        };

        Ok(Some(TransformResult {
            text,
            segments: serde_json::from_str(&segments)?,
            language,
            confidence,
            speakers: serde_json::from_str::<SpeakerInfo>(&speakers)?,
            processing_seconds: secs,
            provider,
            model,
        }))
    }

    /// Item count per state
    pub fn counts(&self) -> Result<StateCounts, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM items GROUP BY state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = StateCounts::default();
        for row in rows {
            let (state, count) = row?;
            let state: ItemState = state.parse().map_err(|reason| StoreError::Corrupt {
                id: "<counts>".to_string(),
                reason,
            })?;
            *counts.slot(state) += count as usize;
        }
        Ok(counts)
    }
}

/// Row as stored, before validation
struct RawItem {
    external_id: String,
    collection_id: String,
    collection_name: String,
    title: String,
    source_url: String,
    duration_seconds: Option<i64>,
    state: String,
    payload_path: Option<String>,
    output_path: Option<String>,
    discovered_at: String,
    fetched_at: Option<String>,
    completed_at: Option<String>,
    updated_at: String,
    error: Option<String>,
    error_kind: Option<String>,
    retry_count: i64,
}

impl RawItem {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            external_id: row.get(0)?,
            collection_id: row.get(1)?,
            collection_name: row.get(2)?,
            title: row.get(3)?,
            source_url: row.get(4)?,
            duration_seconds: row.get(5)?,
            state: row.get(6)?,
            payload_path: row.get(7)?,
            output_path: row.get(8)?,
            discovered_at: row.get(9)?,
            fetched_at: row.get(10)?,
            completed_at: row.get(11)?,
            updated_at: row.get(12)?,
            error: row.get(13)?,
            error_kind: row.get(14)?,
            retry_count: row.get(15)?,
        })
    }

    fn into_item(self) -> Result<WorkItem, StoreError> {
        let id = self.external_id.clone();
        let corrupt = |reason: String| StoreError::Corrupt {
            id: id.clone(),
            reason,
        };

        let state: ItemState = self.state.parse().map_err(corrupt)?;
        let parse = |value: &str| parse_timestamp(value).map_err(corrupt);
        let parse_opt = |value: Option<String>| value.as_deref().map(parse).transpose();

        Ok(WorkItem {
            state,
            discovered_at: parse(&self.discovered_at)?,
            updated_at: parse(&self.updated_at)?,
            fetched_at: parse_opt(self.fetched_at)?,
            completed_at: parse_opt(self.completed_at)?,
            external_id: self.external_id,
            collection_id: self.collection_id,
            collection_name: self.collection_name,
            title: self.title,
            source_url: self.source_url,
            duration_seconds: self.duration_seconds.map(|d| d.max(0) as u64),
            payload_path: self.payload_path.map(PathBuf::from),
            output_path: self.output_path.map(PathBuf::from),
            error: self.error,
            error_kind: self.error_kind,
            retry_count: self.retry_count.max(0) as u32,
        })
    }
}

fn fetch_item(conn: &Connection, id: &str) -> Result<Option<WorkItem>, StoreError> {
    let sql = format!("SELECT {} FROM items WHERE external_id = ?1", ITEM_COLUMNS);
    conn.query_row(&sql, params![id], RawItem::from_row)
        .optional()?
        .map(RawItem::into_item)
        .transpose()
}

fn query_items(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<WorkItem>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, RawItem::from_row)?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row?.into_item()?);
    }
    Ok(items)
}

fn current_state(conn: &Connection, id: &str) -> Result<ItemState, StoreError> {
    let state: String = conn
        .query_row(
            "SELECT state FROM items WHERE external_id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

    state.parse().map_err(|reason| StoreError::Corrupt {
        id: id.to_string(),
        reason,
    })
}

/// Fixed-width UTC timestamps sort correctly as text
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{}': {}", value, e))
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Segment;

    fn sample(id: &str) -> NewItem {
        NewItem::new(id, format!("Video {}", id), format!("https://example.com/{}", id), "chan")
            .with_duration(300)
    }

    fn sample_result() -> TransformResult {
        TransformResult {
            text: "hello world".to_string(),
            segments: vec![Segment::new(0.0, 1.5, "hello world").with_confidence(0.9)],
            language: "en".to_string(),
            confidence: 0.9,
            speakers: SpeakerInfo::absent(SpeakerInfo::PRIMARY_FAILED),
            processing_seconds: 1.2,
            provider: "whisper".to_string(),
            model: "base".to_string(),
        }
    }

    #[test]
    fn test_put_is_idempotent() {
        let store = ItemStore::in_memory().unwrap();

        let first = store.put(&sample("a")).unwrap();
        let second = store.put(&sample("a")).unwrap();

        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(first.item().external_id, second.item().external_id);
        assert_eq!(store.counts().unwrap().total(), 1);
        assert_eq!(first.item().state, ItemState::Pending);
    }

    #[test]
    fn test_list_by_state_oldest_first() {
        let store = ItemStore::in_memory().unwrap();
        for id in ["first", "second", "third"] {
            store.put(&sample(id)).unwrap();
        }

        let pending = store.list_by_state(ItemState::Pending).unwrap();
        let ids: Vec<&str> = pending.iter().map(|i| i.external_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_transition_unknown_item() {
        let store = ItemStore::in_memory().unwrap();
        let err = store
            .transition("missing", ItemState::Fetching, TransitionUpdate::none())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_full_lifecycle() {
        let store = ItemStore::in_memory().unwrap();
        store.put(&sample("a")).unwrap();

        store.transition("a", ItemState::Fetching, TransitionUpdate::none()).unwrap();
        let item = store
            .transition("a", ItemState::Fetched, TransitionUpdate::fetched("/tmp/chan/a.mp3"))
            .unwrap();
        assert_eq!(item.payload_path, Some(PathBuf::from("/tmp/chan/a.mp3")));
        assert!(item.fetched_at.is_some());

        store.transition("a", ItemState::Transforming, TransitionUpdate::none()).unwrap();
        assert!(store.result("a").unwrap().is_none());

        let item = store
            .transition(
                "a",
                ItemState::Completed,
                TransitionUpdate::completed("/out/a/transcription.json", sample_result()),
            )
            .unwrap();

        assert_eq!(item.state, ItemState::Completed);
        assert!(item.payload_path.is_none());
        assert_eq!(item.output_path, Some(PathBuf::from("/out/a/transcription.json")));
        assert!(item.completed_at.is_some());

        let result = store.result("a").unwrap().unwrap();
        assert_eq!(result, sample_result());
    }

    #[test]
    fn test_completed_requires_result() {
        let store = ItemStore::in_memory().unwrap();
        store.put(&sample("a")).unwrap();
        store.transition("a", ItemState::Fetching, TransitionUpdate::none()).unwrap();
        store
            .transition("a", ItemState::Fetched, TransitionUpdate::fetched("/tmp/a"))
            .unwrap();
        store.transition("a", ItemState::Transforming, TransitionUpdate::none()).unwrap();

        let update = TransitionUpdate {
            output_path: Some(PathBuf::from("/out/a.json")),
            ..TransitionUpdate::default()
        };
        let err = store.transition("a", ItemState::Completed, update).unwrap_err();
        assert!(matches!(err, StoreError::MissingField { field: "result", .. }));

        // Nothing was written
        assert_eq!(store.get("a").unwrap().unwrap().state, ItemState::Transforming);
        assert!(store.result("a").unwrap().is_none());
    }

    #[test]
    fn test_failed_increments_retry_count() {
        let store = ItemStore::in_memory().unwrap();
        store.put(&sample("a")).unwrap();
        store.transition("a", ItemState::Fetching, TransitionUpdate::none()).unwrap();

        let item = store
            .transition(
                "a",
                ItemState::Failed,
                TransitionUpdate::failed("too_large", "Payload too large"),
            )
            .unwrap();

        assert_eq!(item.state, ItemState::Failed);
        assert_eq!(item.retry_count, 1);
        assert_eq!(item.error.as_deref(), Some("Payload too large"));
        assert_eq!(item.error_kind.as_deref(), Some("too_large"));
    }

    #[test]
    fn test_rejects_illegal_transitions() {
        let store = ItemStore::in_memory().unwrap();
        store.put(&sample("a")).unwrap();

        let err = store
            .transition("a", ItemState::Transforming, TransitionUpdate::none())
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: ItemState::Pending,
                to: ItemState::Transforming,
                ..
            }
        ));
    }

    #[test]
    fn test_rediscovery_does_not_reset_failed_item() {
        let store = ItemStore::in_memory().unwrap();
        store.put(&sample("a")).unwrap();
        store.transition("a", ItemState::Fetching, TransitionUpdate::none()).unwrap();
        store
            .transition("a", ItemState::Failed, TransitionUpdate::failed("io", "boom"))
            .unwrap();

        let outcome = store.put(&sample("a")).unwrap();
        assert!(!outcome.is_new());
        assert_eq!(outcome.item().state, ItemState::Failed);
    }

    #[test]
    fn test_requeue_failed_item() {
        let store = ItemStore::in_memory().unwrap();
        store.put(&sample("a")).unwrap();

        // Only failed items can be requeued
        assert!(store.requeue("a").is_err());

        store.transition("a", ItemState::Fetching, TransitionUpdate::none()).unwrap();
        store
            .transition("a", ItemState::Failed, TransitionUpdate::failed("timeout", "slow"))
            .unwrap();

        let item = store.requeue("a").unwrap();
        assert_eq!(item.state, ItemState::Pending);
        assert_eq!(item.retry_count, 1);
        assert!(item.error.is_none());
    }

    #[test]
    fn test_recover_interrupted_items() {
        let store = ItemStore::in_memory().unwrap();
        store.put(&sample("a")).unwrap();
        store.put(&sample("b")).unwrap();
        store.transition("a", ItemState::Fetching, TransitionUpdate::none()).unwrap();

        let recovered = store.recover_interrupted().unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].external_id, "a");

        let item = store.get("a").unwrap().unwrap();
        assert_eq!(item.state, ItemState::Failed);
        assert_eq!(item.error_kind.as_deref(), Some("interrupted"));
        assert_eq!(item.retry_count, 1);
        assert_eq!(store.get("b").unwrap().unwrap().state, ItemState::Pending);
    }

    #[test]
    fn test_in_flight_counts_fetched() {
        let counts = StateCounts {
            pending: 4,
            fetching: 1,
            fetched: 2,
            transforming: 1,
            completed: 7,
            failed: 3,
        };
        assert_eq!(counts.in_flight(), 4);
    }

    #[test]
    fn test_recover_item_left_fetched() {
        let store = ItemStore::in_memory().unwrap();
        store.put(&sample("f")).unwrap();
        store.transition("f", ItemState::Fetching, TransitionUpdate::none()).unwrap();
        store
            .transition("f", ItemState::Fetched, TransitionUpdate::fetched("/tmp/chan/f.mp3"))
            .unwrap();

        let recovered = store.recover_interrupted().unwrap();

        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].state, ItemState::Fetched);
        assert_eq!(
            recovered[0].payload_path.as_deref(),
            Some(Path::new("/tmp/chan/f.mp3"))
        );
        let item = store.get("f").unwrap().unwrap();
        assert_eq!(item.state, ItemState::Failed);
        assert!(item.payload_path.is_none());
        assert!(item.state.can_requeue());
    }

    #[test]
    fn test_counts() {
        let store = ItemStore::in_memory().unwrap();
        store.put(&sample("a")).unwrap();
        store.put(&sample("b")).unwrap();
        store.transition("b", ItemState::Fetching, TransitionUpdate::none()).unwrap();

        let counts = store.counts().unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.fetching, 1);
        assert_eq!(counts.get(ItemState::Completed), 0);
        assert_eq!(counts.total(), 2);
    }
}
