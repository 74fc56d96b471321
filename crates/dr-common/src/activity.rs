//! Read-only view of the recording schedule for status reporting.

use std::path::PathBuf;

use chrono::Duration;

/// What the recorder is doing right now.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivitySnapshot {
    /// Output path of the window currently receiving data.
    pub active_path: Option<PathBuf>,
    /// Time until the active window's nominal stop.
    pub time_left: Option<Duration>,
    /// Number of windows still scheduled, including the active one.
    pub queued: usize,
}

impl ActivitySnapshot {
    pub fn is_active(&self) -> bool {
        self.active_path.is_some()
    }
}

/// Implemented by whatever owns the window schedule.
pub trait ActivityProbe: Send + Sync {
    fn snapshot(&self) -> ActivitySnapshot;
}
