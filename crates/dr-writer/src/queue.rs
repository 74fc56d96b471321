//! Ordered schedule of recording windows.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use dr_common::{ActivityProbe, ActivitySnapshot};
use tracing::{info, warn};

use crate::block::Block;
use crate::reduction::StreamParameters;
use crate::window::{RecordingWindow, WindowError, WriteOutcome};

/// A window removed from the queue and the result of stopping it.
#[derive(Debug)]
pub struct Reaped {
    pub path: PathBuf,
    /// Post-processing artifact on success.
    pub result: Result<Option<PathBuf>, WindowError>,
}

/// Windows ordered by start time. Shared between the block source, which
/// writes, and status reporting, which only looks.
#[derive(Debug, Default)]
pub struct WindowQueue {
    windows: Mutex<VecDeque<RecordingWindow>>,
}

impl WindowQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<RecordingWindow>> {
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Schedule a window, keeping start-time order.
    pub fn push(&self, window: RecordingWindow) {
        let mut windows = self.lock();
        let at = windows.partition_point(|w| w.start_time() <= window.start_time());
        info!(
            path = %window.path().display(),
            start = %window.start_time(),
            stop = %window.stop_time(),
            "Window scheduled"
        );
        windows.insert(at, window);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Run `f` on the first active, unfinished window.
    pub fn with_active<T>(&self, f: impl FnOnce(&mut RecordingWindow) -> T) -> Option<T> {
        let mut windows = self.lock();
        windows
            .iter_mut()
            .find(|w| !w.is_finalized() && w.is_active())
            .map(f)
    }

    /// Start the active window if it has not been started yet.
    ///
    /// Returns `true` when a window was started by this call.
    pub fn start_active(&self, params: &StreamParameters) -> Result<bool, WindowError> {
        self.with_active(|w| {
            if w.is_started() {
                Ok(false)
            } else {
                w.start(params).map(|()| true)
            }
        })
        .unwrap_or(Ok(false))
    }

    /// Route a block to the active window.
    pub fn write(&self, time_tag: u64, block: &Block) -> Result<WriteOutcome, WindowError> {
        self.with_active(|w| w.write(time_tag, block))
            .unwrap_or(Ok(WriteOutcome::NotActive))
    }

    /// Stop and remove every expired window.
    pub fn reap(&self) -> Vec<Reaped> {
        let expired: Vec<RecordingWindow> = {
            let mut windows = self.lock();
            let (expired, live): (VecDeque<_>, VecDeque<_>) =
                windows.drain(..).partition(|w| w.is_expired());
            *windows = live;
            expired.into()
        };
        expired.into_iter().map(finish).collect()
    }

    /// Cancel every scheduled window and remove them all.
    pub fn cancel_all(&self) -> Vec<Reaped> {
        let windows: Vec<RecordingWindow> = self.lock().drain(..).collect();
        windows
            .into_iter()
            .map(|mut w| {
                let mut result = w.cancel();
                if let Ok(None) = result {
                    // Never active: close whatever it holds.
                    result = w.stop();
                }
                if let Err(e) = &result {
                    warn!(path = %w.path().display(), error = %e, "Cancel failed");
                }
                Reaped {
                    path: w.path().to_path_buf(),
                    result,
                }
            })
            .collect()
    }
}

fn finish(mut window: RecordingWindow) -> Reaped {
    let result = window.stop();
    if let Err(e) = &result {
        warn!(path = %window.path().display(), error = %e, "Window stop failed");
    }
    Reaped {
        path: window.path().to_path_buf(),
        result,
    }
}

impl ActivityProbe for WindowQueue {
    fn snapshot(&self) -> ActivitySnapshot {
        let windows = self.lock();
        let active = windows
            .iter()
            .find(|w| !w.is_finalized() && w.is_active());
        ActivitySnapshot {
            active_path: active.map(|w| w.path().to_path_buf()),
            time_left: active.map(|w| w.time_left()),
            queued: windows.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySinkFactory;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use dr_common::ManualClock;
    use std::sync::Arc;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn window(clock: &ManualClock, name: &str, start: i64, stop: i64) -> RecordingWindow {
        RecordingWindow::spectra(
            format!("/tmp/dr-queue-{}", name),
            t(start),
            t(stop),
            Arc::new(MemorySinkFactory::new()),
            Arc::new(clock.clone()),
        )
        .unwrap()
    }

    #[test]
    fn test_push_orders_by_start() {
        let clock = ManualClock::new(t(0));
        let queue = WindowQueue::new();
        queue.push(window(&clock, "late", 500, 600));
        queue.push(window(&clock, "early", 100, 200));

        clock.set(t(150));
        let snap = queue.snapshot();
        assert_eq!(snap.queued, 2);
        assert_eq!(
            snap.active_path.unwrap().file_name().unwrap(),
            "dr-queue-early"
        );
        assert_eq!(snap.time_left, Some(Duration::seconds(50)));
    }

    #[test]
    fn test_idle_snapshot() {
        let clock = ManualClock::new(t(0));
        let queue = WindowQueue::new();
        queue.push(window(&clock, "a", 100, 200));
        let snap = queue.snapshot();
        assert!(!snap.is_active());
        assert_eq!(snap.queued, 1);
    }

    #[test]
    fn test_reap_removes_only_expired() {
        let clock = ManualClock::new(t(0));
        let queue = WindowQueue::new();
        queue.push(window(&clock, "a", 100, 200));
        queue.push(window(&clock, "b", 300, 400));

        clock.set(t(250));
        let reaped = queue.reap();
        assert_eq!(reaped.len(), 1);
        assert!(reaped[0].path.ends_with("dr-queue-a"));
        assert!(reaped[0].result.is_ok());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_write_without_active_window() {
        let clock = ManualClock::new(t(0));
        let queue = WindowQueue::new();
        queue.push(window(&clock, "a", 100, 200));
        let block = Block::zeros(crate::block::BlockShape::new(1, 1, 1, 1));
        assert_eq!(queue.write(0, &block).unwrap(), WriteOutcome::NotActive);
    }

    #[test]
    fn test_cancel_all_empties_queue() {
        let clock = ManualClock::new(t(150));
        let queue = WindowQueue::new();
        queue.push(window(&clock, "a", 100, 200));
        queue.push(window(&clock, "b", 300, 400));

        let reaped = queue.cancel_all();
        assert_eq!(reaped.len(), 2);
        assert!(reaped.iter().all(|r| r.result.is_ok()));
        assert!(queue.is_empty());
    }
}
