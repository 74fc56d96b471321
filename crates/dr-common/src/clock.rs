//! Time sources.
//!
//! Components that need "now" take an `Arc<dyn ClockSource>` instead of
//! reading the wall clock directly. The acquisition pipeline runs behind
//! real time by a variable lag; [`LaggedClock`] subtracts that lag so that
//! window activity checks line up with the data actually flowing through.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

/// Supplies the current time.
pub trait ClockSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Shared handle to the current pipeline lag.
///
/// Stored with microsecond resolution. Clones observe the same value.
#[derive(Debug, Clone, Default)]
pub struct PipelineLag {
    micros: Arc<AtomicI64>,
}

impl PipelineLag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lag.
    pub fn get(&self) -> Duration {
        Duration::microseconds(self.micros.load(Ordering::Relaxed))
    }

    /// Update the lag, typically from the block source as blocks arrive.
    pub fn set(&self, lag: Duration) {
        let micros = lag.num_microseconds().unwrap_or(i64::MAX);
        self.micros.store(micros, Ordering::Relaxed);
    }
}

/// Wall-clock time minus the pipeline lag.
#[derive(Debug, Clone, Default)]
pub struct LaggedClock {
    lag: PipelineLag,
}

impl LaggedClock {
    pub fn new(lag: PipelineLag) -> Self {
        Self { lag }
    }

    pub fn lag(&self) -> &PipelineLag {
        &self.lag
    }
}

impl ClockSource for LaggedClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now() - self.lag.get()
    }
}

/// Manually driven clock for deterministic tests and replays.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
