//! Beacon daemon
//!
//! Registers this machine's worker with the scheduler through its SSH
//! gateway and keeps it registered until interrupted. Retrying after the
//! beacon exits is left to whatever supervises it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::oneshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use beacon_agent::shutdown::install_shutdown_handler;
use beacon_agent::ssh::SshClient;
use beacon_agent::{Beacon, Lifecycle};
use beacon_core::config::{self, BeaconConfig};
use beacon_core::RegistrationMode;

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Registers a worker with the scheduler over SSH")]
#[command(version)]
struct Args {
    /// Operation to perform (defaults to register)
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Gateway address (host:port)
    #[arg(long, global = true)]
    tsa: Option<String>,

    /// Path to the worker's private key
    #[arg(short, long, global = true)]
    key: Option<PathBuf>,

    /// Worker name (defaults to hostname)
    #[arg(long, global = true)]
    name: Option<String>,

    /// Registration mode: forward or direct
    #[arg(long, global = true)]
    mode: Option<RegistrationMode>,

    /// Run in foreground with verbose output
    #[arg(short, long, global = true)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Register the worker and stay registered
    Register,
    /// Register through forwarded ports, whatever the configured mode
    Forward,
    /// Retire the worker
    Retire,
    /// Land the worker
    Land,
}

impl From<Command> for Lifecycle {
    fn from(command: Command) -> Self {
        match command {
            Command::Register => Lifecycle::Register,
            Command::Forward => Lifecycle::Forward,
            Command::Retire => Lifecycle::Retire,
            Command::Land => Lifecycle::Land,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&args)?;
    config.validate().context("Invalid configuration")?;

    let lifecycle: Lifecycle = args.command.unwrap_or(Command::Register).into();
    let worker = config.worker.to_worker();
    tracing::info!(
        "Beacon starting: {} worker '{}' via {} ({} mode)",
        lifecycle,
        worker.name,
        config.tsa_address,
        config.registration_mode
    );

    let client = SshClient::new(&config).context("Failed to create SSH client")?;
    let beacon = Beacon::new(client, worker).with_mode(config.registration_mode);

    let shutdown = install_shutdown_handler();
    let (ready_tx, ready_rx) = oneshot::channel();
    tokio::spawn(async move {
        if ready_rx.await.is_ok() {
            tracing::info!("Worker {} is live", lifecycle);
        }
    });

    beacon
        .run(lifecycle, &shutdown, ready_tx)
        .await
        .with_context(|| format!("Beacon {} failed", lifecycle))?;

    tracing::info!("Beacon exited");
    Ok(())
}

/// Load the config file and apply command-line overrides
fn load_config(args: &Args) -> Result<BeaconConfig> {
    let mut config = match &args.config {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => {
            let default_path = config::default_config_path();
            if default_path.exists() {
                config::load_config(&default_path).unwrap_or_else(|e| {
                    tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                    BeaconConfig::default()
                })
            } else {
                tracing::info!("Using default configuration");
                BeaconConfig::default()
            }
        }
    };

    if let Some(tsa) = &args.tsa {
        config.tsa_address = tsa.clone();
    }
    if let Some(key) = &args.key {
        config.private_key_path = key.clone();
    }
    if let Some(name) = &args.name {
        config.worker.name = Some(name.clone());
    }
    if let Some(mode) = args.mode {
        config.registration_mode = mode;
    }

    Ok(config)
}
