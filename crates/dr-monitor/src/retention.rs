//! Directory quota enforcement.
//!
//! [`RetentionManager`] tracks every entry of one output directory in age
//! order (oldest first) together with its size, and removes the oldest
//! entries while the directory is over quota:
//! - Sizes are cached by path across scans; only new entries are walked
//! - Entries that disappear between scans are dropped silently
//! - The newest entry is never removed, even over quota
//! - A failed removal is logged and skipped; the cycle moves on to the next
//!   entry instead of retrying the stuck one
//! - Every removal is recorded as a [`RetentionEvent`], optionally persisted
//!   as JSONL

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use dr_common::{MetricsError, MetricsStore, PointValue};
use dr_config::{EntryOrder, StorageConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::daemon::{adaptive_sleep, CycleError, PeriodicTask};
use crate::disk::{disk_usage, path_size};

/// Errors from retention operations.
#[derive(Error, Debug)]
pub enum RetentionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// One tracked file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionEntry {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Why an entry was removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetentionReason {
    QuotaExceeded { quota_bytes: u64, used_bytes: u64 },
}

/// Record of one eviction attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionEvent {
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub reason: RetentionReason,
    /// False when the removal failed and the entry is still on disk.
    pub removed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a directory scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub entries: usize,
    /// Entries seen for the first time and sized by walking them.
    pub added: usize,
    /// Previously tracked entries no longer present.
    pub dropped: usize,
    /// New entries that could not be sized and are not tracked.
    pub skipped: usize,
    pub total_bytes: u64,
}

/// Result of one enforcement pass.
#[derive(Debug, Clone, Default)]
pub struct EnforceReport {
    pub removed: Vec<RetentionEntry>,
    pub failed: Vec<PathBuf>,
    pub freed_bytes: u64,
    pub total_bytes: u64,
    pub events: Vec<RetentionEvent>,
}

/// Deletes an entry from disk.
pub trait EntryRemover: Send + Sync {
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Removes files with `remove_file` and directories recursively.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsRemover;

impl EntryRemover for FsRemover {
    fn remove(&self, path: &Path) -> io::Result<()> {
        if fs::symlink_metadata(path)?.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }
}

/// Keeps one directory under a size quota.
pub struct RetentionManager {
    directory: PathBuf,
    quota_bytes: Option<u64>,
    update_interval_secs: i64,
    order: EntryOrder,
    event_log_dir: Option<PathBuf>,
    remover: Box<dyn EntryRemover>,
    metrics: Option<Arc<dyn MetricsStore>>,
    entries: Vec<RetentionEntry>,
}

impl std::fmt::Debug for RetentionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionManager")
            .field("directory", &self.directory)
            .field("quota_bytes", &self.quota_bytes)
            .field("update_interval_secs", &self.update_interval_secs)
            .field("order", &self.order)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl RetentionManager {
    /// A quota of `None` or `Some(0)` disables eviction; the manager still
    /// scans and publishes storage statistics.
    pub fn new(directory: impl Into<PathBuf>, quota_bytes: Option<u64>) -> Self {
        Self {
            directory: directory.into(),
            quota_bytes: quota_bytes.filter(|q| *q > 0),
            update_interval_secs: StorageConfig::default().update_interval_secs,
            order: EntryOrder::default(),
            event_log_dir: None,
            remover: Box::new(FsRemover),
            metrics: None,
            entries: Vec::new(),
        }
    }

    pub fn from_config(config: &StorageConfig, metrics: Arc<dyn MetricsStore>) -> Self {
        let mut manager = Self::new(&config.directory, config.effective_quota())
            .with_update_interval(config.update_interval_secs)
            .with_order(config.order)
            .with_metrics(metrics);
        manager.event_log_dir = config.event_log_dir.clone();
        manager
    }

    /// Positive: fixed sleep. Zero or negative: adaptive cadence.
    pub fn with_update_interval(mut self, secs: i64) -> Self {
        self.update_interval_secs = secs;
        self
    }

    pub fn with_order(mut self, order: EntryOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_event_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.event_log_dir = Some(dir.into());
        self
    }

    pub fn with_remover(mut self, remover: impl EntryRemover + 'static) -> Self {
        self.remover = Box::new(remover);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsStore>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn quota_bytes(&self) -> Option<u64> {
        self.quota_bytes
    }

    /// Tracked entries, oldest first.
    pub fn entries(&self) -> &[RetentionEntry] {
        &self.entries
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size_bytes).sum()
    }

    // ------------------------------------------------------------------
    // Scan
    // ------------------------------------------------------------------

    /// Re-list the directory, reusing cached sizes for known paths.
    ///
    /// A new entry that cannot be sized is left untracked for this pass. If
    /// the listing itself fails the previous entries are kept.
    pub fn scan(&mut self) -> Result<ScanReport, RetentionError> {
        let mut listed: Vec<(PathBuf, Option<SystemTime>)> = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let modified = match self.order {
                EntryOrder::Name => None,
                EntryOrder::Modified => match entry.metadata() {
                    Ok(meta) => meta.modified().ok(),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => {
                        warn!(path = %entry.path().display(), error = %e, "Could not stat entry; skipped");
                        continue;
                    }
                },
            };
            listed.push((entry.path(), modified));
        }
        match self.order {
            EntryOrder::Name => listed.sort_by(|a, b| a.0.cmp(&b.0)),
            EntryOrder::Modified => listed.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0))),
        }

        let mut cached: HashMap<PathBuf, u64> = self
            .entries
            .drain(..)
            .map(|e| (e.path, e.size_bytes))
            .collect();
        let previously = cached.len();

        let mut report = ScanReport::default();
        let mut kept = 0usize;
        for (path, _) in listed {
            let size_bytes = match cached.remove(&path) {
                Some(size) => {
                    kept += 1;
                    size
                }
                None => match path_size(&path) {
                    Ok(size) => {
                        report.added += 1;
                        size
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Could not size entry; skipped");
                        report.skipped += 1;
                        continue;
                    }
                },
            };
            self.entries.push(RetentionEntry { path, size_bytes });
        }

        report.entries = self.entries.len();
        report.dropped = previously - kept;
        report.total_bytes = self.total_bytes();
        debug!(
            directory = %self.directory.display(),
            entries = report.entries,
            added = report.added,
            dropped = report.dropped,
            skipped = report.skipped,
            total_bytes = report.total_bytes,
            "Scan complete"
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Enforce
    // ------------------------------------------------------------------

    /// Remove the oldest entries until the directory fits the quota or only
    /// the newest entry is left.
    ///
    /// A failed removal leaves the entry tracked and moves on to the next
    /// one; the newest entry is never a candidate.
    pub fn enforce(&mut self) -> Result<EnforceReport, RetentionError> {
        let mut report = EnforceReport {
            total_bytes: self.total_bytes(),
            ..Default::default()
        };
        let Some(quota) = self.quota_bytes else {
            return Ok(report);
        };

        let mut cursor = 0usize;
        while report.total_bytes > quota && cursor + 1 < self.entries.len() {
            let entry = &self.entries[cursor];
            let reason = RetentionReason::QuotaExceeded {
                quota_bytes: quota,
                used_bytes: report.total_bytes,
            };
            match self.remover.remove(&entry.path) {
                Ok(()) => {
                    info!(
                        path = %entry.path.display(),
                        bytes = entry.size_bytes,
                        used_bytes = report.total_bytes,
                        quota_bytes = quota,
                        "Removed entry over quota"
                    );
                    report.events.push(RetentionEvent {
                        timestamp: Utc::now(),
                        path: entry.path.clone(),
                        size_bytes: entry.size_bytes,
                        reason,
                        removed: true,
                        error: None,
                    });
                    let entry = self.entries.remove(cursor);
                    report.total_bytes -= entry.size_bytes;
                    report.freed_bytes += entry.size_bytes;
                    report.removed.push(entry);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %entry.path.display(), "Entry already gone");
                    let entry = self.entries.remove(cursor);
                    report.total_bytes -= entry.size_bytes;
                }
                Err(e) => {
                    warn!(path = %entry.path.display(), error = %e, "Could not remove entry");
                    report.events.push(RetentionEvent {
                        timestamp: Utc::now(),
                        path: entry.path.clone(),
                        size_bytes: entry.size_bytes,
                        reason,
                        removed: false,
                        error: Some(e.to_string()),
                    });
                    report.failed.push(entry.path.clone());
                    cursor += 1;
                }
            }
        }

        if let Some(dir) = &self.event_log_dir {
            persist_events(&report.events, dir)?;
        }
        if !report.removed.is_empty() {
            debug!(
                removed = report.removed.len(),
                failed = report.failed.len(),
                freed_bytes = report.freed_bytes,
                "Quota report"
            );
        }
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------

    /// Zero the storage points so stale values from a previous run are not
    /// mistaken for current ones.
    pub fn publish_reset(&self) -> Result<(), RetentionError> {
        let Some(metrics) = &self.metrics else {
            return Ok(());
        };
        let now = Utc::now();
        metrics.write_point("storage/active_disk_size", 0i64.into(), now, Some("B"))?;
        metrics.write_point("storage/active_disk_free", 0i64.into(), now, Some("B"))?;
        metrics.write_point("storage/active_directory", PointValue::Null, now, None)?;
        metrics.write_point("storage/active_directory_size", 0i64.into(), now, Some("B"))?;
        metrics.write_point("storage/active_directory_count", 0i64.into(), now, None)?;
        Ok(())
    }

    /// Publish disk capacity and the tracked directory totals.
    pub fn publish_storage(&self) -> Result<(), RetentionError> {
        let usage = disk_usage(&self.directory)?;
        let total_bytes = self.total_bytes();
        debug!(
            directory = %self.directory.display(),
            disk_size = usage.total_bytes,
            disk_free = usage.free_bytes,
            count = self.entries.len(),
            total_bytes,
            "Storage report"
        );

        let Some(metrics) = &self.metrics else {
            return Ok(());
        };
        let now = Utc::now();
        metrics.write_point(
            "storage/active_disk_size",
            usage.total_bytes.into(),
            now,
            Some("B"),
        )?;
        metrics.write_point(
            "storage/active_disk_free",
            usage.free_bytes.into(),
            now,
            Some("B"),
        )?;
        let now = Utc::now();
        metrics.write_point(
            "storage/active_directory",
            self.directory.display().to_string().into(),
            now,
            None,
        )?;
        metrics.write_point(
            "storage/active_directory_size",
            total_bytes.into(),
            now,
            Some("B"),
        )?;
        metrics.write_point(
            "storage/active_directory_count",
            self.entries.len().into(),
            now,
            None,
        )?;
        Ok(())
    }

    /// Scan, enforce, publish.
    ///
    /// A failed scan still enforces the quota and publishes against the
    /// entries already tracked; the scan error is returned afterwards.
    pub fn run_once(&mut self) -> Result<EnforceReport, RetentionError> {
        let scanned = self.scan();
        if let Err(e) = &scanned {
            warn!(
                directory = %self.directory.display(),
                error = %e,
                entries = self.entries.len(),
                "Could not refresh the entry list; using the previous one"
            );
        }
        let report = self.enforce()?;
        self.publish_storage()?;
        scanned?;
        Ok(report)
    }
}

impl PeriodicTask for RetentionManager {
    fn name(&self) -> &str {
        "retention"
    }

    fn run_cycle(&mut self) -> Result<(), CycleError> {
        self.run_once()?;
        Ok(())
    }

    fn next_sleep(&self, cycle_cost: Duration) -> Duration {
        adaptive_sleep(self.update_interval_secs, cycle_cost)
    }
}

/// Append events to a timestamped JSONL file in `log_dir`.
fn persist_events(events: &[RetentionEvent], log_dir: &Path) -> Result<(), RetentionError> {
    if events.is_empty() {
        return Ok(());
    }
    fs::create_dir_all(log_dir)?;

    let filename = format!(
        "retention_events_{}.jsonl",
        Utc::now().format("%Y%m%d_%H%M%S")
    );
    let log_path = log_dir.join(filename);
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let mut writer = io::BufWriter::new(file);
    for event in events {
        serde_json::to_writer(&mut writer, event)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    info!(
        count = events.len(),
        path = %log_path.display(),
        "Wrote retention events"
    );
    Ok(())
}
