//! The monitor set wired the way `drd monitor` wires it.

use std::fs;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, TimeZone, Utc};
use dr_common::{InMemoryMetricsStore, ManualClock, MetricsStore, PipelineLag, PointValue, ShutdownSignal};
use dr_config::RecorderConfig;
use dr_core::MonitorSet;
use dr_writer::{MemorySinkFactory, RecordingWindow, WindowQueue};
use tempfile::TempDir;

fn config_for(dir: &TempDir, quota: u64) -> RecorderConfig {
    let mut config = RecorderConfig::default();
    config.storage.directory = dir.path().to_path_buf();
    config.storage.quota_bytes = Some(quota);
    config.health.poll_interval_secs = 1;
    config.performance.poll_interval_secs = 1;
    config
}

#[test]
fn single_pass_enforces_quota_and_publishes_health() {
    let dir = TempDir::new().unwrap();
    for (name, size) in [("a", 10), ("b", 20), ("c", 30), ("d", 5)] {
        fs::write(dir.path().join(name), vec![0u8; size]).unwrap();
    }

    let store = InMemoryMetricsStore::with_namespace("drx");
    let mut monitors = MonitorSet::from_config(&config_for(&dir, 40), Arc::new(store.clone()));
    let summary = monitors.run_once();

    let report = summary.retention.unwrap();
    assert_eq!(report.removed.len(), 2);
    assert_eq!(report.total_bytes, 35);
    assert!(summary.performance.is_ok());
    let assessment = summary.health.unwrap();
    assert_ne!(assessment.summary.as_str(), "unknown");

    assert_eq!(
        store.read_point("storage/active_directory_size").unwrap().value,
        PointValue::Int(35)
    );
    assert!(store.snapshot().contains_key("drx/summary"));
    assert!(store.snapshot().contains_key("drx/info"));
}

#[test]
fn active_window_shows_in_status_points() {
    let dir = TempDir::new().unwrap();
    let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let clock = ManualClock::new(start + Duration::seconds(30));

    let queue = Arc::new(WindowQueue::new());
    let output = dir.path().join("obs-0001");
    queue.push(
        RecordingWindow::spectra(
            &output,
            start,
            start + Duration::seconds(60),
            Arc::new(MemorySinkFactory::new()),
            Arc::new(clock.clone()),
        )
        .unwrap(),
    );

    let store = InMemoryMetricsStore::new();
    let lag = PipelineLag::new();
    lag.set(Duration::seconds(2));
    let mut monitors = MonitorSet::from_config(&config_for(&dir, 0), Arc::new(store.clone()))
        .with_activity(queue.clone())
        .with_lag(lag);
    monitors.run_once();

    let expected = output.display().to_string();
    assert_eq!(
        store.read_point("op-type").unwrap().value.as_str(),
        Some(expected.as_str())
    );
    assert_eq!(
        store.read_point("bifrost/pipeline_lag").unwrap().value,
        PointValue::Float(2.0)
    );

    clock.advance(Duration::seconds(120));
    assert_eq!(queue.reap().len(), 1);
    monitors.run_once();
    assert_eq!(store.read_point("op-type").unwrap().value, PointValue::Null);
}

#[test]
fn stats_file_feeds_performance_points() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    fs::create_dir(&data).unwrap();
    let stats = dir.path().join("stats.json");
    fs::write(
        &stats,
        r#"{"spectra": {"perf": {"acquire_time": 0.1, "process_time": 0.25, "reserve_time": 0.05}}}"#,
    )
    .unwrap();

    let mut config = RecorderConfig::default();
    config.storage.directory = data;
    config.performance.stats_path = Some(stats);

    let store = InMemoryMetricsStore::new();
    let mut monitors = MonitorSet::from_config(&config, Arc::new(store.clone()));
    let summary = monitors.run_once();

    assert_eq!(summary.performance.unwrap().max_process, 0.25);
    assert_eq!(
        store.read_point("bifrost/max_process").unwrap().value,
        PointValue::Float(0.25)
    );
}

#[test]
fn spawned_monitors_stop_on_shutdown() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a"), b"abc").unwrap();

    let store = InMemoryMetricsStore::new();
    let monitors = MonitorSet::from_config(&config_for(&dir, 0), Arc::new(store.clone()));
    let shutdown = ShutdownSignal::new();
    let handles = monitors.spawn(&shutdown).unwrap();
    assert_eq!(handles.len(), 3);

    let mut waited = 0;
    while store.read_point("storage/active_directory_count").map(|p| p.value)
        != Some(PointValue::Int(1))
    {
        std::thread::sleep(StdDuration::from_millis(10));
        waited += 1;
        assert!(waited < 1000, "retention never published");
    }

    shutdown.trigger();
    for handle in handles {
        assert!(handle.join().unwrap() >= 1);
    }
}
