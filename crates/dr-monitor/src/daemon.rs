//! Periodic daemon loop shared by the monitors.
//!
//! Each monitor runs on its own thread and sleeps between cycles with
//! [`ShutdownSignal::wait_timeout`], so shutdown latency is bounded by the
//! current sleep of each loop rather than the sum across loops.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dr_common::ShutdownSignal;
use tracing::{debug, info, warn};

/// Weight of the configured target in the adaptive sleep blend.
pub const ALPHA: f64 = 0.3;

/// Error type returned from a single cycle.
pub type CycleError = Box<dyn std::error::Error + Send + Sync>;

// ---------------------------------------------------------------------------
// Task trait
// ---------------------------------------------------------------------------

/// One unit of periodic work.
pub trait PeriodicTask: Send {
    fn name(&self) -> &str;

    /// Run one cycle. Errors are logged by the runner and never end the loop.
    fn run_cycle(&mut self) -> Result<(), CycleError>;

    /// Sleep before the next cycle given the cost of the one just run.
    fn next_sleep(&self, cycle_cost: Duration) -> Duration;
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

/// Sleep for an interval in seconds.
///
/// A positive interval is used as is. Zero or negative selects the adaptive
/// cadence `ALPHA * |interval| + (1 - ALPHA) * cycle_cost`.
pub fn adaptive_sleep(interval_secs: i64, cycle_cost: Duration) -> Duration {
    if interval_secs > 0 {
        return Duration::from_secs(interval_secs.unsigned_abs());
    }
    let target = interval_secs.unsigned_abs() as f64;
    Duration::from_secs_f64(ALPHA * target + (1.0 - ALPHA) * cycle_cost.as_secs_f64())
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Run `task` until shutdown, or for exactly one cycle when `once` is set.
///
/// Returns the number of cycles run.
pub fn run_periodic<T: PeriodicTask + ?Sized>(
    task: &mut T,
    shutdown: &ShutdownSignal,
    once: bool,
) -> u64 {
    let mut cycles = 0u64;
    while !shutdown.is_triggered() {
        let started = Instant::now();
        if let Err(e) = task.run_cycle() {
            warn!(task = task.name(), error = %e, "Cycle failed");
        }
        cycles += 1;

        let cost = started.elapsed();
        let sleep = task.next_sleep(cost);
        debug!(
            task = task.name(),
            elapsed_ms = cost.as_millis() as u64,
            sleep_ms = sleep.as_millis() as u64,
            "Cycle complete"
        );

        if once || shutdown.wait_timeout(sleep) {
            break;
        }
    }
    info!(task = task.name(), cycles, "Daemon done");
    cycles
}

/// Run `task` on a dedicated thread named after it.
pub fn spawn_periodic<T: PeriodicTask + 'static>(
    mut task: T,
    shutdown: ShutdownSignal,
) -> io::Result<JoinHandle<u64>> {
    let name = task.name().to_string();
    thread::Builder::new()
        .name(name)
        .spawn(move || run_periodic(&mut task, &shutdown, false))
}
