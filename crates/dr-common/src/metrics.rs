//! Monitor-point store.
//!
//! Daemons publish named, timestamped values here and read each other's
//! points back. The transport behind a production store is external; the
//! in-memory implementation is what the daemons and tests run against.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from metrics store operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("metrics store unavailable: {0}")]
    Unavailable(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Value carried by a monitor point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValue {
    Int(i64),
    Float(f64),
    Text(String),
    Null,
}

impl PointValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PointValue::Int(v) => Some(*v as f64),
            PointValue::Float(v) => Some(*v),
            PointValue::Text(_) | PointValue::Null => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PointValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for PointValue {
    fn from(v: f64) -> Self {
        PointValue::Float(v)
    }
}

impl From<i64> for PointValue {
    fn from(v: i64) -> Self {
        PointValue::Int(v)
    }
}

impl From<u64> for PointValue {
    fn from(v: u64) -> Self {
        PointValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<usize> for PointValue {
    fn from(v: usize) -> Self {
        PointValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<&str> for PointValue {
    fn from(v: &str) -> Self {
        PointValue::Text(v.to_string())
    }
}

impl From<String> for PointValue {
    fn from(v: String) -> Self {
        PointValue::Text(v)
    }
}

impl<T: Into<PointValue>> From<Option<T>> for PointValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(PointValue::Null)
    }
}

/// A published value with the time it describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorPoint {
    pub value: PointValue,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl MonitorPoint {
    pub fn new(value: impl Into<PointValue>, timestamp: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            timestamp,
            unit: None,
        }
    }
}

/// Shared key/value store of monitor points.
pub trait MetricsStore: Send + Sync {
    fn write_point(
        &self,
        name: &str,
        value: PointValue,
        timestamp: DateTime<Utc>,
        unit: Option<&str>,
    ) -> Result<(), MetricsError>;

    fn read_point(&self, name: &str) -> Option<MonitorPoint>;
}

/// Thread-safe in-process store. Clones share the same points.
///
/// An optional namespace (typically the pipeline id) is prepended to every
/// point name as `<namespace>/<name>`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMetricsStore {
    namespace: Option<String>,
    points: Arc<RwLock<BTreeMap<String, MonitorPoint>>>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            points: Arc::default(),
        }
    }

    fn key(&self, name: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, name),
            None => name.to_string(),
        }
    }

    /// Copy of every point currently held, keyed by full name.
    pub fn snapshot(&self) -> BTreeMap<String, MonitorPoint> {
        self.points
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// All points rendered as a JSON object.
    pub fn to_json(&self) -> Result<String, MetricsError> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }
}

impl MetricsStore for InMemoryMetricsStore {
    fn write_point(
        &self,
        name: &str,
        value: PointValue,
        timestamp: DateTime<Utc>,
        unit: Option<&str>,
    ) -> Result<(), MetricsError> {
        let point = MonitorPoint {
            value,
            timestamp,
            unit: unit.map(str::to_string),
        };
        let key = self.key(name);
        let mut points = self
            .points
            .write()
            .map_err(|_| MetricsError::Unavailable("metrics lock poisoned".to_string()))?;
        points.insert(key, point);
        Ok(())
    }

    fn read_point(&self, name: &str) -> Option<MonitorPoint> {
        let key = self.key(name);
        self.points
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
    }
}
