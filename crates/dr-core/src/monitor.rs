//! The set of monitoring daemons a recorder runs.

use std::sync::Arc;
use std::thread::JoinHandle;

use dr_common::{ActivityProbe, MetricsStore, PipelineLag, ShutdownSignal};
use dr_config::RecorderConfig;
use dr_monitor::{
    spawn_periodic, Assessment, EnforceReport, HealthAggregator, HealthError, JsonStatsSource,
    PerformanceError, PerformancePoller, PerformanceReport, PipelineStatsSource, RetentionError,
    RetentionManager,
};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("retention: {0}")]
    Retention(#[from] RetentionError),

    #[error("health: {0}")]
    Health(#[from] HealthError),

    #[error("performance: {0}")]
    Performance(#[from] PerformanceError),

    #[error("could not start daemon thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Outcome of one pass over every monitor.
#[derive(Debug)]
pub struct CycleSummary {
    pub retention: Result<EnforceReport, RetentionError>,
    pub performance: Result<PerformanceReport, PerformanceError>,
    pub health: Result<Assessment, HealthError>,
}

/// Retention, performance and health monitors sharing one metrics store.
pub struct MonitorSet {
    pub retention: RetentionManager,
    pub performance: PerformancePoller,
    pub health: HealthAggregator,
}

impl MonitorSet {
    pub fn from_config(config: &RecorderConfig, metrics: Arc<dyn MetricsStore>) -> Self {
        let mut performance = PerformancePoller::from_config(&config.performance, metrics.clone());
        if let Some(path) = &config.performance.stats_path {
            let source: Arc<dyn PipelineStatsSource> = Arc::new(JsonStatsSource::new(path));
            performance = performance.with_source(source);
        }
        Self {
            retention: RetentionManager::from_config(&config.storage, metrics.clone()),
            performance,
            health: HealthAggregator::from_config(&config.health, metrics),
        }
    }

    /// Report `op-type`/`op-tag` from the recording schedule.
    pub fn with_activity(mut self, probe: Arc<dyn ActivityProbe>) -> Self {
        self.health = self.health.with_activity(probe);
        self
    }

    /// Publish the pipeline lag alongside the performance points.
    pub fn with_lag(mut self, lag: PipelineLag) -> Self {
        self.performance = self.performance.with_lag(lag);
        self
    }

    /// Run each monitor once. Health goes last so it sees this pass's points.
    pub fn run_once(&mut self) -> CycleSummary {
        CycleSummary {
            retention: self.retention.run_once(),
            performance: self.performance.poll(),
            health: self.health.assess(),
        }
    }

    /// Start every monitor on its own thread.
    pub fn spawn(self, shutdown: &ShutdownSignal) -> Result<Vec<JoinHandle<u64>>, MonitorError> {
        if let Err(e) = self.retention.publish_reset() {
            warn!(error = %e, "Could not reset storage points");
        }
        let handles = vec![
            spawn_periodic(self.retention, shutdown.clone())?,
            spawn_periodic(self.performance, shutdown.clone())?,
            spawn_periodic(self.health, shutdown.clone())?,
        ];
        info!(daemons = handles.len(), "Monitors started");
        Ok(handles)
    }
}
