use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use zview::collectors::SystemCommandRunner;
use zview::{Config, ConfigError, Telemetry};

/// Command-line arguments
#[derive(Parser)]
#[command(
    name = "zview",
    about = "ZFS telemetry engine",
    long_about = "Collects ARC, pool IO, transaction group, dataset, read and event statistics \
                  from the ZFS kernel module and pool tooling, printing a JSON summary \
                  periodically until interrupted."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Seconds between two JSON summaries
    #[arg(
        short,
        long,
        value_name = "SECS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    dump_interval: u64,
}

/// Load configuration from file or use defaults
///
/// A missing file falls back to defaults; a malformed one is an error.
fn load_config(path: Option<&PathBuf>) -> Result<Config, ConfigError> {
    match path {
        Some(path) if !path.exists() => {
            warn!(
                "Configuration file '{}' not found, using defaults",
                path.display()
            );
            Ok(Config::default())
        }
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Config::from_file(path)
        }
        None => {
            info!("Using default configuration");
            Ok(Config::default())
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref()).context("Failed to load configuration")?;
    let mut telemetry = Telemetry::start(config, Arc::new(SystemCommandRunner))
        .context("Failed to start telemetry")?;

    let (shutdown_sender, shutdown_receiver) = mpsc::channel();
    ctrlc::set_handler(move || {
        info!("Received termination signal, shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    })
    .context("Error setting signal handler")?;

    info!("zview is running. Press Ctrl+C to stop.");
    let interval = Duration::from_secs(cli.dump_interval);
    loop {
        match shutdown_receiver.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if let Err(e) = telemetry.rescan() {
                    warn!("Pool rescan failed: {}", e);
                }
                let snapshot = serde_json::to_string(&telemetry.snapshot())
                    .context("Failed to serialize snapshot")?;
                println!("{}", snapshot);
            }
        }
    }

    telemetry.stop();
    info!("zview shutdown complete");
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
