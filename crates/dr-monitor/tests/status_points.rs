//! Health and performance monitors against a shared metrics store.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use dr_common::{
    ActivityProbe, ActivitySnapshot, InMemoryMetricsStore, ManualClock, MetricsStore, PipelineLag,
    PointValue,
};
use dr_config::HealthConfig;
use dr_monitor::{
    evaluate, BlockPerf, BlockStats, CaptureStats, HealthAggregator, HealthError, HealthLimits,
    HealthSummary, JsonStatsSource, PerformanceError, PerformancePoller, PipelineStats,
    PipelineStatsSource,
};
use tempfile::TempDir;

fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn put(store: &InMemoryMetricsStore, name: &str, value: PointValue, at: DateTime<Utc>) {
    store.write_point(name, value, at, None).unwrap();
}

fn disk(store: &InMemoryMetricsStore, total: u64, free: u64, at: DateTime<Utc>) {
    put(store, "storage/active_disk_size", total.into(), at);
    put(store, "storage/active_disk_free", free.into(), at);
}

fn summary(store: &InMemoryMetricsStore) -> (String, String, DateTime<Utc>) {
    let summary = store.read_point("summary").unwrap();
    let info = store.read_point("info").unwrap();
    (
        summary.value.as_str().unwrap().to_string(),
        info.value.as_str().unwrap().to_string(),
        summary.timestamp,
    )
}

#[test]
fn healthy_inputs_publish_normal_at_stalest_timestamp() {
    let store = InMemoryMetricsStore::new();
    disk(&store, 1000, 500, t(30));
    put(&store, "bifrost/rx_missing", 0.001.into(), t(20));
    put(&store, "bifrost/max_process", 0.5.into(), t(10));

    let health = HealthAggregator::new(Arc::new(store.clone()));
    let assessment = health.assess().unwrap();
    assert_eq!(assessment.summary, HealthSummary::Normal);

    let (summary, info, ts) = summary(&store);
    assert_eq!(summary, "normal");
    assert_eq!(info, "A-OK");
    assert_eq!(ts, t(10));
    assert_eq!(store.read_point("info").unwrap().timestamp, t(10));
}

#[test]
fn absent_missing_fraction_counts_as_zero() {
    let store = InMemoryMetricsStore::new();
    disk(&store, 1000, 500, t(30));

    let health = HealthAggregator::new(Arc::new(store.clone()));
    assert_eq!(health.assess().unwrap().summary, HealthSummary::Normal);
    assert_eq!(summary(&store).2, t(30));
}

#[test]
fn each_threshold_combination() {
    let cases = [
        (500, 0.0, "normal"),
        (995, 0.0, "warning"),
        (500, 0.5, "warning"),
        (995, 0.5, "error"),
    ];
    for (free, missing, expected) in cases {
        let store = InMemoryMetricsStore::new();
        disk(&store, 1000, free, t(0));
        put(&store, "bifrost/rx_missing", missing.into(), t(0));
        HealthAggregator::new(Arc::new(store.clone()))
            .assess()
            .unwrap();
        assert_eq!(summary(&store).0, expected, "free={free} missing={missing}");
    }
}

#[test]
fn default_limits_table() {
    let cases = [
        (500, 0.001, HealthSummary::Normal),
        (999, 0.001, HealthSummary::Warning),
        (500, 0.02, HealthSummary::Warning),
        (999, 0.02, HealthSummary::Error),
    ];
    for (free, missing, expected) in cases {
        let ratio = free as f64 / 1000.0;
        assert_eq!(
            evaluate(Some(ratio), missing, &HealthLimits::default()).summary,
            expected,
            "ratio={ratio} missing={missing}"
        );

        let store = InMemoryMetricsStore::new();
        disk(&store, 1000, free, t(0));
        put(&store, "bifrost/rx_missing", missing.into(), t(0));
        let assessment = HealthAggregator::new(Arc::new(store.clone()))
            .assess()
            .unwrap();
        assert_eq!(assessment.summary, expected, "free={free} missing={missing}");
    }
}

#[test]
fn configured_limits_are_used() {
    let store = InMemoryMetricsStore::new();
    disk(&store, 1000, 600, t(0));
    let config = HealthConfig {
        disk_ratio_limit: 0.5,
        ..Default::default()
    };
    let health = HealthAggregator::from_config(&config, Arc::new(store.clone()));
    assert_eq!(health.assess().unwrap().summary, HealthSummary::Warning);
    assert!(summary(&store).1.starts_with("no space"));
}

#[test]
fn missing_disk_publishes_unknown_and_fails() {
    let store = InMemoryMetricsStore::new();
    put(&store, "bifrost/rx_missing", 0.0.into(), t(5));
    put(&store, "storage/active_disk_free", 10u64.into(), t(3));

    let health = HealthAggregator::new(Arc::new(store.clone()));
    let err = health.assess().unwrap_err();
    assert!(matches!(
        err,
        HealthError::MissingMetric("storage/active_disk_size")
    ));

    let (summary, _, ts) = summary(&store);
    assert_eq!(summary, "unknown");
    assert_eq!(ts, t(3));
}

struct FixedActivity(ActivitySnapshot);

impl ActivityProbe for FixedActivity {
    fn snapshot(&self) -> ActivitySnapshot {
        self.0.clone()
    }
}

#[test]
fn active_window_is_reported() {
    let store = InMemoryMetricsStore::new();
    disk(&store, 1000, 500, t(0));
    let probe = FixedActivity(ActivitySnapshot {
        active_path: Some(PathBuf::from("/data/recordings/obs1")),
        time_left: Some(Duration::seconds(30)),
        queued: 2,
    });

    HealthAggregator::new(Arc::new(store.clone()))
        .with_activity(Arc::new(probe))
        .assess()
        .unwrap();

    assert_eq!(
        store.read_point("op-type").unwrap().value.as_str(),
        Some("/data/recordings/obs1")
    );
    assert_eq!(
        store.read_point("op-tag").unwrap().value.as_str(),
        Some("/data/recordings/obs1")
    );
}

#[test]
fn idle_schedule_reports_null_operation() {
    let store = InMemoryMetricsStore::new();
    disk(&store, 1000, 500, t(0));
    HealthAggregator::new(Arc::new(store.clone()))
        .with_activity(Arc::new(FixedActivity(ActivitySnapshot::default())))
        .assess()
        .unwrap();
    assert_eq!(store.read_point("op-type").unwrap().value, PointValue::Null);
}

/// Replays a fixed sequence of snapshots.
struct Scripted {
    snapshots: Mutex<Vec<PipelineStats>>,
}

impl PipelineStatsSource for Scripted {
    fn load(&self) -> Result<PipelineStats, PerformanceError> {
        let mut snapshots = self.snapshots.lock().unwrap();
        Ok(if snapshots.len() > 1 {
            snapshots.remove(0)
        } else {
            snapshots[0].clone()
        })
    }
}

fn pipeline(good: u64, missing: u64, process: f64) -> PipelineStats {
    let mut stats = PipelineStats::new();
    stats.insert(
        "udp_capture".to_string(),
        BlockStats {
            perf: Some(BlockPerf {
                acquire_time: 0.01,
                process_time: 0.02,
                reserve_time: 0.0,
            }),
            stats: Some(CaptureStats {
                ngood_bytes: good,
                nlate_bytes: 0,
                nmissing_bytes: missing,
            }),
        },
    );
    stats.insert(
        "spectra".to_string(),
        BlockStats {
            perf: Some(BlockPerf {
                acquire_time: 0.001,
                process_time: process,
                reserve_time: 0.003,
            }),
            stats: None,
        },
    );
    stats
}

#[test]
fn performance_rates_need_two_snapshots() {
    let store = InMemoryMetricsStore::new();
    let clock = ManualClock::new(t(0));
    let source = Scripted {
        snapshots: Mutex::new(vec![pipeline(0, 0, 0.1), pipeline(4000, 1000, 0.7)]),
    };
    let lag = PipelineLag::new();
    lag.set(Duration::milliseconds(1500));

    let mut poller = PerformancePoller::new(Arc::new(store.clone()))
        .with_source(Arc::new(source))
        .with_clock(Arc::new(clock.clone()))
        .with_lag(lag);

    let first = poller.poll().unwrap();
    assert_eq!(first.max_process, 0.1);
    assert!(first.rx_rate.is_none());
    assert!(store.read_point("bifrost/rx_rate").is_none());
    assert_eq!(first.pipeline_lag, Some(1.5));

    clock.advance(Duration::seconds(10));
    let second = poller.poll().unwrap();
    assert_eq!(second.max_process, 0.7);
    assert_eq!(second.max_acquire, 0.01);
    assert_eq!(second.rx_rate, Some(400.0));
    assert_eq!(second.rx_missing, Some(0.2));

    let rate = store.read_point("bifrost/rx_rate").unwrap();
    assert_eq!(rate.unit.as_deref(), Some("B/s"));
    assert_eq!(rate.timestamp, t(10));
    assert_eq!(
        store.read_point("bifrost/max_process").unwrap().value,
        PointValue::Float(0.7)
    );
    assert_eq!(
        store.read_point("bifrost/pipeline_lag").unwrap().value,
        PointValue::Float(1.5)
    );
}

#[test]
fn performance_feeds_health() {
    let store = InMemoryMetricsStore::new();
    let clock = ManualClock::new(t(0));
    let source = Scripted {
        snapshots: Mutex::new(vec![pipeline(0, 0, 0.1), pipeline(500, 500, 0.1)]),
    };
    let mut poller = PerformancePoller::new(Arc::new(store.clone()))
        .with_source(Arc::new(source))
        .with_clock(Arc::new(clock.clone()));
    poller.poll().unwrap();
    clock.advance(Duration::seconds(10));
    poller.poll().unwrap();

    disk(&store, 1000, 500, t(10));
    let assessment = HealthAggregator::new(Arc::new(store.clone()))
        .assess()
        .unwrap();
    assert_eq!(assessment.summary, HealthSummary::Warning);
    assert_eq!(assessment.info, "missing packets (50.0% missing)");
}

#[test]
fn json_source_reads_stats_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stats.json");
    std::fs::write(
        &path,
        r#"{"udp_capture": {"stats": {"ngood_bytes": 1, "nlate_bytes": 2, "nmissing_bytes": 3}}}"#,
    )
    .unwrap();

    let stats = JsonStatsSource::new(&path).load().unwrap();
    assert_eq!(stats["udp_capture"].stats.unwrap().nlate_bytes, 2);

    let missing = JsonStatsSource::new(dir.path().join("absent.json"));
    assert!(matches!(missing.load(), Err(PerformanceError::Io(_))));
}
