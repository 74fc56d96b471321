//! Data recorder common types.
//!
//! This crate provides the primitives shared by the writer and the
//! monitoring daemons:
//! - Clock sources, including the pipeline-lag adjusted clock
//! - Cooperative shutdown signal with interruptible waits
//! - Time-tag arithmetic for the base sample clock
//! - Monitor-point metrics store
//! - Activity probe for reporting the currently recording window

pub mod activity;
pub mod clock;
pub mod metrics;
pub mod shutdown;
pub mod timetag;

pub use activity::{ActivityProbe, ActivitySnapshot};
pub use clock::{ClockSource, LaggedClock, ManualClock, PipelineLag, SystemClock};
pub use metrics::{InMemoryMetricsStore, MetricsError, MetricsStore, MonitorPoint, PointValue};
pub use shutdown::ShutdownSignal;
pub use timetag::{
    chan_to_freq, datetime_to_timetag, timetag_to_datetime, CHAN_BW, FS, TICKS_PER_CHANNEL,
};
