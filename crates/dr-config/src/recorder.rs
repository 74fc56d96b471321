//! Typed `recorder.json` configuration.
//!
//! Every field has a default so that a partial file, or no file at all,
//! yields a usable configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::validate::ValidationError;

/// Full recorder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Schema version of the file.
    pub schema_version: String,

    /// Pipeline identifier, used as the metrics namespace.
    pub id: String,

    pub storage: StorageConfig,
    pub health: HealthConfig,
    pub performance: PerformanceConfig,
    pub recording: RecordingConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            id: "drx".to_string(),
            storage: StorageConfig::default(),
            health: HealthConfig::default(),
            performance: PerformanceConfig::default(),
            recording: RecordingConfig::default(),
        }
    }
}

/// Output directory quota and storage reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding completed outputs.
    pub directory: PathBuf,

    /// Maximum total size in bytes. `None` or 0 disables enforcement.
    pub quota_bytes: Option<u64>,

    /// Seconds between cycles. Zero or negative selects the adaptive
    /// cadence, with the magnitude as the target.
    pub update_interval_secs: i64,

    /// How directory entries are ordered from oldest to newest.
    pub order: EntryOrder,

    /// Directory for JSONL retention event logs.
    pub event_log_dir: Option<PathBuf>,
}

/// Age ordering for retention entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrder {
    /// Lexicographic names, for outputs named by creation time.
    #[default]
    Name,
    /// Last modification time.
    Modified,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("/data/recordings"),
            quota_bytes: None,
            update_interval_secs: 600,
            order: EntryOrder::Name,
            event_log_dir: None,
        }
    }
}

impl StorageConfig {
    /// Quota with 0 normalized to "no quota".
    pub fn effective_quota(&self) -> Option<u64> {
        self.quota_bytes.filter(|q| *q > 0)
    }
}

/// Health summary thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub poll_interval_secs: u64,

    /// Disk is healthy while `free / total` stays below this ratio.
    pub disk_ratio_limit: f64,

    /// Data flow is healthy while the missing fraction stays below this.
    pub missing_fraction_limit: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            disk_ratio_limit: 0.99,
            missing_fraction_limit: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub poll_interval_secs: u64,

    /// JSON file of per-block pipeline statistics, rewritten by the pipeline.
    pub stats_path: Option<PathBuf>,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            stats_path: None,
        }
    }
}

/// Recording window behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Tolerance in seconds applied to both window bounds.
    pub margin_secs: f64,

    /// Parent directory for per-process scratch space.
    pub scratch_base: PathBuf,

    /// Remove the raw output once its archive has been written.
    pub archive_remove_original: bool,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            margin_secs: 1.0,
            scratch_base: PathBuf::from("/dev/shm"),
            archive_remove_original: true,
        }
    }
}

impl RecorderConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ValidationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ValidationError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json)
            .map_err(|e| ValidationError::ParseError(format!("Invalid JSON: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RecorderConfig::default();
        assert_eq!(config.storage.update_interval_secs, 600);
        assert_eq!(config.health.disk_ratio_limit, 0.99);
        assert_eq!(config.health.missing_fraction_limit, 0.01);
        assert_eq!(config.recording.margin_secs, 1.0);
        assert!(config.storage.effective_quota().is_none());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = RecorderConfig::from_json(
            r#"{"id": "dr2", "storage": {"directory": "/tmp/out", "quota_bytes": 4096}}"#,
        )
        .unwrap();

        assert_eq!(config.id, "dr2");
        assert_eq!(config.storage.directory, PathBuf::from("/tmp/out"));
        assert_eq!(config.storage.effective_quota(), Some(4096));
        assert_eq!(config.storage.update_interval_secs, 600);
        assert_eq!(config.health.poll_interval_secs, 10);
    }

    #[test]
    fn test_zero_quota_disables() {
        let config = RecorderConfig::from_json(r#"{"storage": {"quota_bytes": 0}}"#).unwrap();
        assert_eq!(config.storage.effective_quota(), None);
    }

    #[test]
    fn test_entry_order_names() {
        let config =
            RecorderConfig::from_json(r#"{"storage": {"order": "modified"}}"#).unwrap();
        assert_eq!(config.storage.order, EntryOrder::Modified);
        assert_eq!(RecorderConfig::default().storage.order, EntryOrder::Name);
    }

    #[test]
    fn test_bad_json_is_parse_error() {
        let err = RecorderConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, ValidationError::ParseError(_)));
    }
}
