//! SIGINT/SIGTERM to [`ShutdownSignal`] bridge.
//!
//! The handler only sets an atomic flag. A watcher thread polls the flag and
//! triggers the shutdown signal from ordinary thread context.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dr_common::ShutdownSignal;
use tracing::info;

static RECEIVED: AtomicBool = AtomicBool::new(false);
static LAST_SIGNAL: AtomicI32 = AtomicI32::new(0);

const POLL: Duration = Duration::from_millis(100);

extern "C" fn on_signal(signum: libc::c_int) {
    LAST_SIGNAL.store(signum, Ordering::SeqCst);
    RECEIVED.store(true, Ordering::SeqCst);
}

fn install(signum: libc::c_int) -> io::Result<()> {
    let handler = on_signal as extern "C" fn(libc::c_int);
    let previous = unsafe { libc::signal(signum, handler as libc::sighandler_t) };
    if previous == libc::SIG_ERR {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Route SIGINT and SIGTERM to `shutdown`.
///
/// The watcher exits once `shutdown` is triggered from any source.
pub fn install_shutdown_handler(shutdown: ShutdownSignal) -> io::Result<JoinHandle<()>> {
    install(libc::SIGINT)?;
    install(libc::SIGTERM)?;

    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || loop {
            if RECEIVED.swap(false, Ordering::SeqCst) {
                info!(signal = LAST_SIGNAL.load(Ordering::SeqCst), "Shutdown requested");
                shutdown.trigger();
                return;
            }
            if shutdown.wait_timeout(POLL) {
                return;
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watcher_exits_on_shutdown() {
        let shutdown = ShutdownSignal::new();
        let handle = install_shutdown_handler(shutdown.clone()).unwrap();
        shutdown.trigger();
        handle.join().unwrap();
    }
}
