//! Data recorder daemon wiring.
//!
//! - [`logging`]: subscriber setup (human or JSONL on stderr)
//! - [`monitor`]: the retention, performance and health monitors as a set
//! - [`signals`]: SIGINT/SIGTERM handling
//! - [`exit_codes`]: process exit codes for `drd`

pub mod exit_codes;
pub mod logging;
pub mod monitor;
pub mod signals;

pub use monitor::{CycleSummary, MonitorError, MonitorSet};
