//! Subscriber setup for the daemons.
//!
//! stdout is reserved for command payloads (`drd quota --once` prints the
//! published points); all log output goes to stderr, either human-readable
//! or as JSON lines.

pub mod config;

pub use config::{LogConfig, LogFormat, LogLevel};

use std::io::IsTerminal;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events pass the configured level.
const LOG_TARGETS: &[&str] = &["dr_core", "drd", "dr_common", "dr_config", "dr_monitor", "dr_writer"];

/// Filter directives for `level`, e.g. `dr_core=info,dr_monitor=info,...`.
pub fn filter_directives(level: LogLevel) -> String {
    let level = LevelFilter::from(level).to_string().to_lowercase();
    LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. `RUST_LOG`, when set, replaces the
/// level-derived filter.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_logging(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config.level)));

    match config.format {
        LogFormat::Human => {
            let layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_names(true)
                .with_ansi(std::io::stderr().is_terminal());
            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init()
                    .is_ok()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer.without_time())
                    .try_init()
                    .is_ok()
            }
        }
        LogFormat::Jsonl => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false)
                    .with_thread_names(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives_cover_workspace() {
        let directives = filter_directives(LogLevel::Debug);
        assert!(directives.contains("dr_monitor=debug"));
        assert!(directives.contains("dr_writer=debug"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_off_filter_parses() {
        let directives = filter_directives(LogLevel::Off);
        assert!(directives.contains("dr_core=off"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }
}
