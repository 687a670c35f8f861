//! Paceloop CLI - run a command repeatedly, throttled by host CPU load.
//!
//! This binary embeds the paceloop daemon around a shell command: each
//! iteration runs the command once, then sleeps for a pause the adaptive
//! throttle derives from the host's load average. Useful for pacing queue
//! drains, sync jobs, and other recurring work that must not starve the
//! machine.

mod controller;
mod error;

use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use paceloop::config::ConfigFile;
use paceloop::daemon::{Daemon, DaemonConfig};
use paceloop::logging::{default_log_dir, default_log_file, init_logging};

use controller::ShellController;
use error::CliError;

#[derive(Parser)]
#[command(name = "paceloop")]
#[command(about = "Run a command repeatedly, throttled by host CPU load", long_about = None)]
struct Args {
    /// Shell command to run once per iteration
    #[arg(long)]
    command: String,

    /// Stop after this many iterations (0 = run until Ctrl-C)
    #[arg(long, default_value = "0")]
    iterations: u64,

    /// Target per-core CPU load percentage to stay under
    #[arg(long)]
    cpu_target: Option<i64>,

    /// Microseconds added to or removed from the pause per sampling event
    #[arg(long)]
    step_micros: Option<i64>,

    /// Seconds between load-average samples (0 samples every iteration)
    #[arg(long)]
    check_interval: Option<i64>,

    /// Fixed pause in microseconds, bypassing the adaptive throttle
    #[arg(long)]
    custom_pause: Option<u64>,

    /// Path to an alternate config file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), CliError> {
    let config = match &args.config {
        Some(path) => ConfigFile::load_from(path)?,
        None => ConfigFile::load()?,
    };

    let log_dir = config
        .logging
        .file
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| default_log_dir().to_string());
    let log_file = config
        .logging
        .file
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| default_log_file().to_string());

    let _logging_guard =
        init_logging(&log_dir, &log_file).map_err(|e| CliError::LoggingInit(e.to_string()))?;

    info!("Paceloop v{}", paceloop::VERSION);

    // Flags override the config file.
    let mut daemon_config = DaemonConfig::from(&config.throttle);
    if let Some(percent) = args.cpu_target {
        daemon_config.cpu_target_percent = percent;
    }
    if let Some(micros) = args.step_micros {
        daemon_config.step_micros = micros;
    }
    if let Some(seconds) = args.check_interval {
        daemon_config.check_interval_secs = seconds;
    }

    // Ctrl-C flips the flag; the loop notices at the next iteration boundary.
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| CliError::SignalHandler(e.to_string()))?;

    let mut shell = ShellController::new(args.command, args.iterations, shutdown);
    if let Some(micros) = args.custom_pause {
        shell = shell.with_custom_pause(Duration::from_micros(micros));
    }

    Daemon::start(daemon_config, shell)
}
