//! Temporary storage quota management.
//!
//! Payload files live under a single temp root. The quota manager measures
//! that root against a ceiling and evicts oldest files first when usage
//! crosses the eviction threshold (80% of the ceiling).

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Eviction starts once usage exceeds this share of the ceiling (4/5)
const THRESHOLD_NUMERATOR: u128 = 4;
const THRESHOLD_DENOMINATOR: u128 = 5;

/// Errors raised by the quota manager
#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("Storage quota exceeded: {used} bytes in use, ceiling {ceiling} bytes")]
    Exceeded { used: u64, ceiling: u64 },

    #[error("Refusing to delete outside temp root: {0}")]
    OutsideRoot(PathBuf),

    #[error("Invalid temp root pattern: {0}")]
    Pattern(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Usage for one file extension
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtensionUsage {
    pub count: usize,
    pub bytes: u64,
}

/// Point-in-time view of temp storage (never persisted)
#[derive(Debug, Clone, Serialize)]
pub struct StorageSnapshot {
    pub root: PathBuf,
    pub used_bytes: u64,
    pub file_count: usize,
    /// Keyed by lowercase extension (`""` for none)
    pub by_extension: BTreeMap<String, ExtensionUsage>,
    pub ceiling_bytes: u64,
    pub eviction_needed: bool,
}

impl StorageSnapshot {
    /// Share of the ceiling in use (may exceed 1.0)
    pub fn usage_ratio(&self) -> f64 {
        if self.ceiling_bytes == 0 {
            return if self.used_bytes == 0 { 0.0 } else { f64::INFINITY };
        }
        self.used_bytes as f64 / self.ceiling_bytes as f64
    }
}

/// Outcome of an eviction pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub files_removed: usize,
    pub bytes_freed: u64,
    /// Bytes still in use when the pass finished
    pub remaining_bytes: u64,
    /// Deletions that failed and were skipped
    pub errors: Vec<String>,
    pub forced: bool,
}

impl EvictionReport {
    fn merge(&mut self, other: EvictionReport) {
        self.files_removed += other.files_removed;
        self.bytes_freed += other.bytes_freed;
        self.remaining_bytes = other.remaining_bytes;
        self.errors.extend(other.errors);
        self.forced |= other.forced;
    }
}

/// A payload file found on disk
#[derive(Debug, Clone)]
struct PayloadFile {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

/// Tracks temp payload usage against a ceiling
#[derive(Debug, Clone)]
pub struct QuotaManager {
    root: PathBuf,
    ceiling_bytes: u64,
}

impl QuotaManager {
    pub fn new(root: impl Into<PathBuf>, ceiling_bytes: u64) -> Self {
        Self {
            root: root.into(),
            ceiling_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ceiling_bytes(&self) -> u64 {
        self.ceiling_bytes
    }

    /// Largest usage that does not require eviction
    pub fn threshold_bytes(&self) -> u64 {
        (self.ceiling_bytes as u128 * THRESHOLD_NUMERATOR / THRESHOLD_DENOMINATOR) as u64
    }

    fn over_threshold(&self, used: u64) -> bool {
        used as u128 * THRESHOLD_DENOMINATOR > self.ceiling_bytes as u128 * THRESHOLD_NUMERATOR
    }

    /// Measure the temp root. A root that does not exist yet is empty.
    pub fn snapshot(&self) -> Result<StorageSnapshot, QuotaError> {
        let files = self.payload_files()?;

        let mut by_extension: BTreeMap<String, ExtensionUsage> = BTreeMap::new();
        let mut used_bytes = 0u64;
        for file in &files {
            used_bytes += file.size;
            let ext = file
                .path
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            let usage = by_extension.entry(ext).or_default();
            usage.count += 1;
            usage.bytes += file.size;
        }

        Ok(StorageSnapshot {
            root: self.root.clone(),
            used_bytes,
            file_count: files.len(),
            by_extension,
            ceiling_bytes: self.ceiling_bytes,
            eviction_needed: self.over_threshold(used_bytes),
        })
    }

    /// Whether `snapshot` is above the eviction threshold
    pub fn needs_eviction(&self, snapshot: &StorageSnapshot) -> bool {
        self.over_threshold(snapshot.used_bytes)
    }

    /// Delete payload files oldest-first until usage is back under the
    /// threshold, or until the root is empty when `force` is set.
    ///
    /// Files that vanish between listing and deletion are skipped silently;
    /// other deletion failures are logged and recorded, never fatal.
    pub async fn evict_until_under_threshold(
        &self,
        force: bool,
    ) -> Result<EvictionReport, QuotaError> {
        let mut files = self.payload_files()?;
        files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));

        let mut used: u64 = files.iter().map(|f| f.size).sum();
        let mut report = EvictionReport {
            forced: force,
            ..EvictionReport::default()
        };

        if !force && !self.over_threshold(used) {
            report.remaining_bytes = used;
            return Ok(report);
        }

        info!(
            used_bytes = used,
            ceiling_bytes = self.ceiling_bytes,
            force,
            "Starting temp storage eviction"
        );

        for file in files {
            if !force && !self.over_threshold(used) {
                break;
            }

            match tokio::fs::remove_file(&file.path).await {
                Ok(()) => {
                    debug!(path = %file.path.display(), bytes = file.size, "Evicted payload");
                    report.files_removed += 1;
                    report.bytes_freed += file.size;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(path = %file.path.display(), "Payload already gone");
                }
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "Could not evict payload");
                    report
                        .errors
                        .push(format!("{}: {}", file.path.display(), e));
                    continue;
                }
            }

            // Re-measure rather than trusting the listing
            used = self.used_bytes()?;
        }

        if force {
            self.prune_empty_dirs().await;
        }

        report.remaining_bytes = self.used_bytes()?;
        info!(
            files_removed = report.files_removed,
            bytes_freed = report.bytes_freed,
            remaining_bytes = report.remaining_bytes,
            "Eviction finished"
        );

        Ok(report)
    }

    /// Make sure there is headroom before more data is written.
    ///
    /// Runs a normal eviction pass when needed; if that leaves usage above the
    /// threshold (deletions failed), retries with a forced pass. If usage is
    /// still above the ceiling after that, [`QuotaError::Exceeded`] is
    /// returned.
    pub async fn ensure_headroom(&self) -> Result<Option<EvictionReport>, QuotaError> {
        let snapshot = self.snapshot()?;
        if !self.needs_eviction(&snapshot) {
            return Ok(None);
        }

        let mut report = self.evict_until_under_threshold(false).await?;
        if self.over_threshold(report.remaining_bytes) {
            warn!(
                remaining_bytes = report.remaining_bytes,
                "Eviction left storage above threshold, forcing full cleanup"
            );
            let forced = self.evict_until_under_threshold(true).await?;
            report.merge(forced);
        }

        if report.remaining_bytes > self.ceiling_bytes {
            return Err(QuotaError::Exceeded {
                used: report.remaining_bytes,
                ceiling: self.ceiling_bytes,
            });
        }

        Ok(Some(report))
    }

    /// Delete one payload file right away. Returns the bytes freed
    /// (0 when the file was already gone).
    pub async fn remove_payload(&self, path: &Path) -> Result<u64, QuotaError> {
        if !path.starts_with(&self.root) {
            return Err(QuotaError::OutsideRoot(path.to_path_buf()));
        }

        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), bytes = size, "Removed payload");
                Ok(size)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn used_bytes(&self) -> Result<u64, QuotaError> {
        Ok(self.payload_files()?.iter().map(|f| f.size).sum())
    }

    /// Every regular file under the root
    fn payload_files(&self) -> Result<Vec<PayloadFile>, QuotaError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let pattern = format!(
            "{}/**/*",
            glob::Pattern::escape(&self.root.to_string_lossy())
        );
        let entries = glob::glob(&pattern).map_err(|e| QuotaError::Pattern(e.to_string()))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            // Entries can disappear mid-scan
            let Ok(meta) = std::fs::symlink_metadata(&path) else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }

            files.push(PayloadFile {
                size: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                path,
            });
        }

        Ok(files)
    }

    /// Remove empty sub-directories left behind by a full wipe
    async fn prune_empty_dirs(&self) {
        let pattern = format!(
            "{}/**/*",
            glob::Pattern::escape(&self.root.to_string_lossy())
        );
        let Ok(entries) = glob::glob(&pattern) else {
            return;
        };

        let mut dirs: Vec<PathBuf> = entries.flatten().filter(|p| p.is_dir()).collect();
        // Deepest first so parents empty out before they are visited
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

        for dir in dirs {
            if let Err(e) = tokio::fs::remove_dir(&dir).await {
                debug!(path = %dir.display(), error = %e, "Keeping directory");
            }
        }
    }
}
