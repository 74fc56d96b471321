//! Pipeline performance polling.
//!
//! Each cycle takes a snapshot of per-block pipeline statistics and compares
//! it against the previous one to derive the receive rate and the fraction
//! of data lost in capture.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dr_common::{ClockSource, MetricsError, MetricsStore, PipelineLag, SystemClock};
use dr_config::PerformanceConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::daemon::{CycleError, PeriodicTask};
use crate::disk::load_average;

/// Blocks whose names end with this suffix carry capture counters.
pub const CAPTURE_SUFFIX: &str = "_capture";

#[derive(Error, Debug)]
pub enum PerformanceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),
}

/// Ring-buffer timing for one block, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockPerf {
    pub acquire_time: f64,
    pub process_time: f64,
    pub reserve_time: f64,
}

/// Cumulative packet capture counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStats {
    pub ngood_bytes: u64,
    pub nlate_bytes: u64,
    pub nmissing_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perf: Option<BlockPerf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<CaptureStats>,
}

/// Statistics for every block of the pipeline, keyed by block name.
pub type PipelineStats = BTreeMap<String, BlockStats>;

/// Supplies the current pipeline statistics.
pub trait PipelineStatsSource: Send + Sync {
    fn load(&self) -> Result<PipelineStats, PerformanceError>;
}

/// Reads statistics from a JSON document the pipeline rewrites in place.
#[derive(Debug, Clone)]
pub struct JsonStatsSource {
    path: PathBuf,
}

impl JsonStatsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PipelineStatsSource for JsonStatsSource {
    fn load(&self) -> Result<PipelineStats, PerformanceError> {
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Figures derived by one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceReport {
    pub max_acquire: f64,
    pub max_process: f64,
    pub max_reserve: f64,
    /// Good bytes per second; `None` until two comparable snapshots exist.
    pub rx_rate: Option<f64>,
    pub rx_missing: Option<f64>,
    pub pipeline_lag: Option<f64>,
    pub load_average: Option<[f64; 3]>,
}

/// Largest acquire, process and reserve times over all blocks.
pub fn max_times(stats: &PipelineStats) -> BlockPerf {
    stats
        .values()
        .filter_map(|b| b.perf)
        .fold(BlockPerf::default(), |acc, p| BlockPerf {
            acquire_time: acc.acquire_time.max(p.acquire_time),
            process_time: acc.process_time.max(p.process_time),
            reserve_time: acc.reserve_time.max(p.reserve_time),
        })
}

fn capture_counters(stats: &PipelineStats) -> Option<CaptureStats> {
    stats
        .iter()
        .filter(|(name, _)| name.ends_with(CAPTURE_SUFFIX))
        .filter_map(|(_, b)| b.stats)
        .last()
}

/// Receive rate and missing fraction between two snapshots.
///
/// `None` when either snapshot lacks capture counters, no time elapsed, or
/// no bytes arrived.
pub fn receive_rates(
    earlier: (DateTime<Utc>, &PipelineStats),
    later: (DateTime<Utc>, &PipelineStats),
) -> Option<(f64, f64)> {
    let c0 = capture_counters(earlier.1)?;
    let c1 = capture_counters(later.1)?;
    let elapsed = (later.0 - earlier.0).num_microseconds()? as f64 / 1e6;
    if elapsed <= 0.0 {
        return None;
    }

    let good = c1.ngood_bytes as f64 - c0.ngood_bytes as f64;
    let missing = c1.nmissing_bytes as f64 - c0.nmissing_bytes as f64;
    let seen = good + missing;
    if seen <= 0.0 {
        return None;
    }
    Some((good / elapsed, missing / seen))
}

/// Publishes pipeline timing, receive statistics, lag and load averages.
pub struct PerformancePoller {
    metrics: Arc<dyn MetricsStore>,
    source: Option<Arc<dyn PipelineStatsSource>>,
    lag: Option<PipelineLag>,
    clock: Arc<dyn ClockSource>,
    history: VecDeque<(DateTime<Utc>, PipelineStats)>,
    poll_interval: Duration,
}

impl PerformancePoller {
    pub fn new(metrics: Arc<dyn MetricsStore>) -> Self {
        Self::from_config(&PerformanceConfig::default(), metrics)
    }

    pub fn from_config(config: &PerformanceConfig, metrics: Arc<dyn MetricsStore>) -> Self {
        Self {
            metrics,
            source: None,
            lag: None,
            clock: Arc::new(SystemClock),
            history: VecDeque::with_capacity(2),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn PipelineStatsSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_lag(mut self, lag: PipelineLag) -> Self {
        self.lag = Some(lag);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }

    fn sample(&mut self) -> Result<(), PerformanceError> {
        let Some(source) = &self.source else {
            return Ok(());
        };
        let stats = source.load()?;
        if self.history.len() == 2 {
            self.history.pop_front();
        }
        self.history.push_back((self.clock.now(), stats));
        Ok(())
    }

    /// Take a snapshot and publish everything derivable from it.
    pub fn poll(&mut self) -> Result<PerformanceReport, PerformanceError> {
        self.sample()?;
        let mut report = PerformanceReport::default();

        if let Some(lag) = &self.lag {
            let secs = lag.get().num_microseconds().unwrap_or(i64::MAX) as f64 / 1e6;
            self.metrics.write_point(
                "bifrost/pipeline_lag",
                secs.into(),
                self.clock.now(),
                Some("s"),
            )?;
            report.pipeline_lag = Some(secs);
        }

        if let Some((_, latest)) = self.history.back() {
            let now = self.clock.now();
            let max = max_times(latest);
            self.metrics
                .write_point("bifrost/max_acquire", max.acquire_time.into(), now, Some("s"))?;
            self.metrics
                .write_point("bifrost/max_process", max.process_time.into(), now, Some("s"))?;
            self.metrics
                .write_point("bifrost/max_reserve", max.reserve_time.into(), now, Some("s"))?;
            report.max_acquire = max.acquire_time;
            report.max_process = max.process_time;
            report.max_reserve = max.reserve_time;
        }

        if let (Some((t0, s0)), Some((t1, s1))) = (self.history.front(), self.history.get(1)) {
            if let Some((rate, missing)) = receive_rates((*t0, s0), (*t1, s1)) {
                let now = self.clock.now();
                self.metrics
                    .write_point("bifrost/rx_rate", rate.into(), now, Some("B/s"))?;
                self.metrics
                    .write_point("bifrost/rx_missing", missing.into(), now, None)?;
                report.rx_rate = Some(rate);
                report.rx_missing = Some(missing);
            }
        }

        if let Some([one, five, fifteen]) = load_average() {
            let now = self.clock.now();
            self.metrics
                .write_point("system/load_average/one_minute", one.into(), now, None)?;
            self.metrics
                .write_point("system/load_average/five_minute", five.into(), now, None)?;
            self.metrics.write_point(
                "system/load_average/fifteen_minute",
                fifteen.into(),
                now,
                None,
            )?;
            report.load_average = Some([one, five, fifteen]);
        }

        debug!(
            max_acquire = report.max_acquire,
            max_process = report.max_process,
            max_reserve = report.max_reserve,
            rx_rate = report.rx_rate,
            rx_missing = report.rx_missing,
            pipeline_lag = report.pipeline_lag,
            "Performance report"
        );
        Ok(report)
    }
}

impl PeriodicTask for PerformancePoller {
    fn name(&self) -> &str {
        "performance"
    }

    fn run_cycle(&mut self) -> Result<(), CycleError> {
        self.poll()?;
        Ok(())
    }

    fn next_sleep(&self, _cycle_cost: Duration) -> Duration {
        self.poll_interval
    }
}
