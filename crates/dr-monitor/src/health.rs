//! Overall pipeline health derived from the other monitors' points.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dr_common::{ActivityProbe, MetricsError, MetricsStore, MonitorPoint, PointValue};
use dr_config::HealthConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::daemon::{CycleError, PeriodicTask};

pub const POINT_DISK_SIZE: &str = "storage/active_disk_size";
pub const POINT_DISK_FREE: &str = "storage/active_disk_free";
pub const POINT_MISSING: &str = "bifrost/rx_missing";
pub const POINT_MAX_PROCESS: &str = "bifrost/max_process";

#[derive(Error, Debug)]
pub enum HealthError {
    #[error("required metric {0} unavailable")]
    MissingMetric(&'static str),

    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),
}

/// Published health state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthSummary {
    Normal,
    Warning,
    Error,
    Unknown,
}

impl HealthSummary {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthSummary::Normal => "normal",
            HealthSummary::Warning => "warning",
            HealthSummary::Error => "error",
            HealthSummary::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds for the summary table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthLimits {
    pub disk_ratio: f64,
    pub missing_fraction: f64,
}

impl Default for HealthLimits {
    fn default() -> Self {
        let config = HealthConfig::default();
        Self {
            disk_ratio: config.disk_ratio_limit,
            missing_fraction: config.missing_fraction_limit,
        }
    }
}

/// Summary and its human-readable explanation.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub summary: HealthSummary,
    pub info: String,
}

/// Classify one set of readings.
///
/// `disk_ratio` is `free / total`, or `None` when either disk point is
/// unavailable, in which case the result is [`HealthSummary::Unknown`].
pub fn evaluate(disk_ratio: Option<f64>, missing: f64, limits: &HealthLimits) -> Assessment {
    let Some(ratio) = disk_ratio else {
        return Assessment {
            summary: HealthSummary::Unknown,
            info: "disk usage unavailable".to_string(),
        };
    };
    let disk_ok = ratio < limits.disk_ratio;
    let data_ok = missing < limits.missing_fraction;

    let (summary, info) = match (disk_ok, data_ok) {
        (true, true) => (HealthSummary::Normal, "A-OK".to_string()),
        (false, true) => (
            HealthSummary::Warning,
            format!("no space ({:.1}% used)", ratio * 100.0),
        ),
        (true, false) => (
            HealthSummary::Warning,
            format!("missing packets ({:.1}% missing)", missing * 100.0),
        ),
        (false, false) => (HealthSummary::Error, "it's bad".to_string()),
    };
    Assessment { summary, info }
}

/// Periodically combines disk and data-flow points into `summary`/`info`.
pub struct HealthAggregator {
    metrics: Arc<dyn MetricsStore>,
    activity: Option<Arc<dyn ActivityProbe>>,
    limits: HealthLimits,
    poll_interval: Duration,
}

impl HealthAggregator {
    pub fn new(metrics: Arc<dyn MetricsStore>) -> Self {
        Self::from_config(&HealthConfig::default(), metrics)
    }

    pub fn from_config(config: &HealthConfig, metrics: Arc<dyn MetricsStore>) -> Self {
        Self {
            metrics,
            activity: None,
            limits: HealthLimits {
                disk_ratio: config.disk_ratio_limit,
                missing_fraction: config.missing_fraction_limit,
            },
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        }
    }

    /// Also publish `op-type`/`op-tag` from the recording schedule.
    pub fn with_activity(mut self, probe: Arc<dyn ActivityProbe>) -> Self {
        self.activity = Some(probe);
        self
    }

    fn publish_activity(&self) -> Result<(), HealthError> {
        let Some(probe) = &self.activity else {
            return Ok(());
        };
        let snapshot = probe.snapshot();
        let now = Utc::now();
        let active = snapshot
            .active_path
            .as_ref()
            .map(|p| p.display().to_string());
        self.metrics
            .write_point("op-type", active.clone().into(), now, None)?;
        self.metrics.write_point("op-tag", active.into(), now, None)?;
        debug!(
            queued = snapshot.queued,
            active = snapshot.is_active(),
            time_left_secs = snapshot.time_left.map(|d| d.num_seconds()),
            "Status report"
        );
        Ok(())
    }

    /// Read inputs, publish the summary, and return it.
    ///
    /// Missing disk points still publish [`HealthSummary::Unknown`], then
    /// fail the cycle.
    pub fn assess(&self) -> Result<Assessment, HealthError> {
        self.publish_activity()?;

        let missing = self.metrics.read_point(POINT_MISSING);
        let processing = self.metrics.read_point(POINT_MAX_PROCESS);
        let total = self.metrics.read_point(POINT_DISK_SIZE);
        let free = self.metrics.read_point(POINT_DISK_FREE);

        let disk_ratio = match (numeric(&total), numeric(&free)) {
            (Some(total), Some(free)) if total > 0.0 => Some(free / total),
            _ => None,
        };
        let missing_fraction = numeric(&missing).unwrap_or(0.0);
        let assessment = evaluate(disk_ratio, missing_fraction, &self.limits);

        let timestamp = stalest([&missing, &processing, &total, &free]).unwrap_or_else(Utc::now);
        self.metrics.write_point(
            "summary",
            assessment.summary.as_str().into(),
            timestamp,
            None,
        )?;
        self.metrics
            .write_point("info", assessment.info.as_str().into(), timestamp, None)?;
        debug!(
            summary = %assessment.summary,
            info = %assessment.info,
            timestamp = %timestamp,
            "Health report"
        );

        if disk_ratio.is_none() {
            let name = if numeric(&total).filter(|t| *t > 0.0).is_none() {
                POINT_DISK_SIZE
            } else {
                POINT_DISK_FREE
            };
            return Err(HealthError::MissingMetric(name));
        }
        Ok(assessment)
    }
}

fn numeric(point: &Option<MonitorPoint>) -> Option<f64> {
    point.as_ref().and_then(|p| p.value.as_f64())
}

/// Oldest timestamp among the points that carry a value.
fn stalest<const N: usize>(points: [&Option<MonitorPoint>; N]) -> Option<DateTime<Utc>> {
    points
        .into_iter()
        .flatten()
        .filter(|p| p.value != PointValue::Null)
        .map(|p| p.timestamp)
        .min()
}

impl PeriodicTask for HealthAggregator {
    fn name(&self) -> &str {
        "health"
    }

    fn run_cycle(&mut self) -> Result<(), CycleError> {
        self.assess()?;
        Ok(())
    }

    fn next_sleep(&self, _cycle_cost: Duration) -> Duration {
        self.poll_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_table() {
        let limits = HealthLimits::default();
        assert_eq!(evaluate(Some(0.5), 0.0, &limits).summary, HealthSummary::Normal);
        assert_eq!(evaluate(Some(0.5), 0.0, &limits).info, "A-OK");

        let no_space = evaluate(Some(0.996), 0.0, &limits);
        assert_eq!(no_space.summary, HealthSummary::Warning);
        assert_eq!(no_space.info, "no space (99.6% used)");

        let missing = evaluate(Some(0.5), 0.25, &limits);
        assert_eq!(missing.summary, HealthSummary::Warning);
        assert_eq!(missing.info, "missing packets (25.0% missing)");

        let bad = evaluate(Some(0.996), 0.25, &limits);
        assert_eq!(bad.summary, HealthSummary::Error);
        assert_eq!(bad.info, "it's bad");
    }

    #[test]
    fn test_limits_are_strict() {
        let limits = HealthLimits::default();
        assert_eq!(
            evaluate(Some(0.99), 0.0, &limits).summary,
            HealthSummary::Warning
        );
        assert_eq!(
            evaluate(Some(0.5), 0.01, &limits).summary,
            HealthSummary::Warning
        );
    }

    #[test]
    fn test_missing_disk_is_unknown() {
        let assessment = evaluate(None, 0.0, &HealthLimits::default());
        assert_eq!(assessment.summary, HealthSummary::Unknown);
    }

    #[test]
    fn test_summary_strings() {
        assert_eq!(HealthSummary::Normal.to_string(), "normal");
        assert_eq!(
            serde_json::to_string(&HealthSummary::Unknown).unwrap(),
            "\"unknown\""
        );
    }
}
