//! Monitoring daemons for the data recorder.
//!
//! This crate provides:
//! - [`RetentionManager`]: keeps the output directory under its quota
//! - [`HealthAggregator`]: folds disk and data-flow points into one summary
//! - [`PerformancePoller`]: pipeline timing, receive rate and load averages
//! - A periodic runner with interruptible sleeps shared by all three

pub mod daemon;
pub mod disk;
pub mod health;
pub mod performance;
pub mod retention;

pub use daemon::{adaptive_sleep, run_periodic, spawn_periodic, CycleError, PeriodicTask, ALPHA};
pub use disk::{disk_usage, load_average, path_size, DiskUsage};
pub use health::{evaluate, Assessment, HealthAggregator, HealthError, HealthLimits, HealthSummary};
pub use performance::{
    BlockPerf, BlockStats, CaptureStats, JsonStatsSource, PerformanceError, PerformancePoller,
    PerformanceReport, PipelineStats, PipelineStatsSource,
};
pub use retention::{
    EnforceReport, EntryRemover, FsRemover, RetentionEntry, RetentionError, RetentionEvent,
    RetentionManager, RetentionReason, ScanReport,
};
