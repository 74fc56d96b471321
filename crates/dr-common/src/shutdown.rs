//! Cooperative shutdown signal shared by all daemon loops.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Inner {
    triggered: Mutex<bool>,
    cond: Condvar,
}

/// A latch that, once triggered, wakes every waiter.
///
/// Daemons sleep with [`ShutdownSignal::wait_timeout`] so a shutdown request
/// ends the sleep immediately instead of after the full interval.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake all waiters.
    pub fn trigger(&self) {
        let mut triggered = self
            .inner
            .triggered
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *triggered = true;
        self.inner.cond.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self
            .inner
            .triggered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep for up to `timeout`.
    ///
    /// Returns `true` if shutdown was requested before or during the wait.
    /// A timeout too large to represent as a deadline waits until shutdown.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut triggered = self
            .inner
            .triggered
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            while !*triggered {
                triggered = self
                    .inner
                    .cond
                    .wait(triggered)
                    .unwrap_or_else(|e| e.into_inner());
            }
            return true;
        };
        while !*triggered {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .inner
                .cond
                .wait_timeout(triggered, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            triggered = guard;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wait_times_out_without_trigger() {
        let signal = ShutdownSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_trigger_interrupts_wait() {
        let signal = ShutdownSignal::new();
        let remote = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.trigger();
        });

        let start = Instant::now();
        assert!(signal.wait_timeout(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(10));
        handle.join().unwrap();
    }

    #[test]
    fn test_unbounded_timeout_waits_for_trigger() {
        let signal = ShutdownSignal::new();
        let remote = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.trigger();
        });

        assert!(signal.wait_timeout(Duration::from_secs(i64::MAX as u64)));
        assert!(signal.wait_timeout(Duration::MAX));
        handle.join().unwrap();
    }

    #[test]
    fn test_already_triggered_returns_immediately() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        assert!(signal.is_triggered());
        assert!(signal.wait_timeout(Duration::from_secs(30)));
    }
}
