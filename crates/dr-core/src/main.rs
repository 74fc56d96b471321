//! drd - data recorder monitoring daemon
//!
//! - `drd monitor`: retention, performance and health monitors from config
//! - `drd quota`: standalone directory quota manager
//! - `drd config`: print the effective configuration

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use clap::{Args, Parser, Subcommand, ValueEnum};
use dr_common::{InMemoryMetricsStore, MetricsStore, PipelineLag, ShutdownSignal};
use dr_config::{load_config, EntryOrder, LoadedConfig, StorageConfig};
use dr_core::exit_codes::ExitCode;
use dr_core::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use dr_core::signals::install_shutdown_handler;
use dr_core::{MonitorError, MonitorSet};
use dr_monitor::{spawn_periodic, RetentionManager};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "drd")]
#[command(author, version, about = "Data recorder monitoring daemon", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// Minimum log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log output format (human, jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the retention, performance and health monitors
    Monitor(MonitorArgs),

    /// Enforce a quota on one directory
    Quota(QuotaArgs),

    /// Print the effective configuration and where it came from
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
struct MonitorArgs {
    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run every monitor once, print the published points and exit
    #[arg(long)]
    once: bool,
}

#[derive(Args, Debug)]
struct QuotaArgs {
    /// Metrics namespace
    #[arg(long, default_value = "drx")]
    id: String,

    /// Directory to manage
    #[arg(long)]
    directory: PathBuf,

    /// Quota in bytes; 0 disables removal
    #[arg(long, default_value_t = 0)]
    quota: u64,

    /// Seconds between cycles; zero or negative adapts to the cycle cost
    #[arg(long, default_value_t = 600, allow_negative_numbers = true)]
    update_interval: i64,

    /// How entries are aged
    #[arg(long, value_enum, default_value_t = OrderArg::Name)]
    order: OrderArg,

    /// Write removal events as JSONL here
    #[arg(long)]
    event_log_dir: Option<PathBuf>,

    /// Run a single cycle, print the published points and exit
    #[arg(long)]
    once: bool,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OrderArg {
    Name,
    Modified,
}

impl From<OrderArg> for EntryOrder {
    fn from(order: OrderArg) -> Self {
        match order {
            OrderArg::Name => EntryOrder::Name,
            OrderArg::Modified => EntryOrder::Modified,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::from_env(cli.global.log_level, cli.global.log_format);
    init_logging(&log_config);

    let code = match cli.command {
        Commands::Monitor(args) => run_monitor(&args),
        Commands::Quota(args) => run_quota(&args),
        Commands::Config(args) => run_config(&args),
    };
    std::process::exit(code);
}

// ============================================================================
// Commands
// ============================================================================

fn run_monitor(args: &MonitorArgs) -> i32 {
    let loaded = match load(args.config.as_ref()) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };
    let config = loaded.config;

    let store = InMemoryMetricsStore::with_namespace(&config.id);
    let metrics: Arc<dyn MetricsStore> = Arc::new(store.clone());
    let mut monitors = MonitorSet::from_config(&config, metrics).with_lag(PipelineLag::new());

    if args.once {
        let summary = monitors.run_once();
        let mut code = ExitCode::Clean;
        if let Err(e) = &summary.retention {
            error!(error = %e, "Retention cycle failed");
            code = ExitCode::IoError;
        }
        if let Err(e) = &summary.performance {
            warn!(error = %e, "Performance cycle failed");
        }
        if let Err(e) = &summary.health {
            warn!(error = %e, "Health cycle failed");
        }
        print_points(&store);
        return code.as_i32();
    }

    let shutdown = ShutdownSignal::new();
    let watcher = match install_shutdown_handler(shutdown.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "Could not install signal handlers");
            return ExitCode::IoError.as_i32();
        }
    };
    info!(
        id = %config.id,
        directory = %config.storage.directory.display(),
        "Starting monitors"
    );
    let handles = match monitors.spawn(&shutdown) {
        Ok(handles) => handles,
        Err(e) => {
            error!(error = %e, "Could not start monitors");
            shutdown.trigger();
            return ExitCode::InternalError.as_i32();
        }
    };
    finish(handles, watcher, &shutdown)
}

fn run_quota(args: &QuotaArgs) -> i32 {
    let storage = StorageConfig {
        directory: args.directory.clone(),
        quota_bytes: Some(args.quota),
        update_interval_secs: args.update_interval,
        order: args.order.into(),
        event_log_dir: args.event_log_dir.clone(),
    };
    if !storage.directory.is_dir() {
        error!(directory = %storage.directory.display(), "Not a directory");
        return ExitCode::ArgsError.as_i32();
    }

    let store = InMemoryMetricsStore::with_namespace(&args.id);
    let mut manager = RetentionManager::from_config(&storage, Arc::new(store.clone()));
    info!(
        directory = %storage.directory.display(),
        quota_bytes = ?manager.quota_bytes(),
        interval_secs = args.update_interval,
        "Quota manager ready"
    );

    if args.once {
        let result: Result<_, MonitorError> = manager
            .publish_reset()
            .and_then(|()| manager.run_once())
            .map_err(Into::into);
        return match result {
            Ok(report) => {
                info!(
                    removed = report.removed.len(),
                    failed = report.failed.len(),
                    total_bytes = report.total_bytes,
                    "Quota cycle complete"
                );
                print_points(&store);
                ExitCode::Clean.as_i32()
            }
            Err(e) => {
                error!(error = %e, "Quota cycle failed");
                ExitCode::IoError.as_i32()
            }
        };
    }

    if let Err(e) = manager.publish_reset() {
        warn!(error = %e, "Could not reset storage points");
    }
    let shutdown = ShutdownSignal::new();
    let watcher = match install_shutdown_handler(shutdown.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "Could not install signal handlers");
            return ExitCode::IoError.as_i32();
        }
    };
    match spawn_periodic(manager, shutdown.clone()) {
        Ok(handle) => finish(vec![handle], watcher, &shutdown),
        Err(e) => {
            error!(error = %e, "Could not start quota manager");
            shutdown.trigger();
            ExitCode::InternalError.as_i32()
        }
    }
}

fn run_config(args: &ConfigArgs) -> i32 {
    let loaded = match load(args.config.as_ref()) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };
    let output = serde_json::json!({
        "source": loaded.source.to_string(),
        "path": loaded.path,
        "config": loaded.config,
    });
    match serde_json::to_string_pretty(&output) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::Clean.as_i32()
        }
        Err(e) => {
            error!(error = %e, "Could not render configuration");
            ExitCode::InternalError.as_i32()
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn load(path: Option<&PathBuf>) -> Result<LoadedConfig, i32> {
    match load_config(path.map(PathBuf::as_path)) {
        Ok(loaded) => {
            info!(
                source = %loaded.source,
                path = ?loaded.path,
                "Configuration loaded"
            );
            Ok(loaded)
        }
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            Err(e.code() as i32)
        }
    }
}

fn print_points(store: &InMemoryMetricsStore) {
    match store.to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => warn!(error = %e, "Could not render metrics"),
    }
}

/// Wait for the daemons to stop, then for the signal watcher.
fn finish(handles: Vec<JoinHandle<u64>>, watcher: JoinHandle<()>, shutdown: &ShutdownSignal) -> i32 {
    let mut code = ExitCode::Clean;
    for handle in handles {
        if handle.join().is_err() {
            error!("Daemon thread panicked");
            shutdown.trigger();
            code = ExitCode::InternalError;
        }
    }
    shutdown.trigger();
    if watcher.join().is_err() {
        code = ExitCode::InternalError;
    }
    info!("Shutdown complete");
    code.as_i32()
}
