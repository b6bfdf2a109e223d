//! Broker Daemon - arbitrates a pool of resource units among TCP clients
//!
//! # Usage
//!
//! ```bash
//! # Start with 10 units on the default port (8080)
//! brokerd 10
//!
//! # Custom port and client limit
//! brokerd 100 --port 9000 --max-clients 32
//!
//! # Read settings from a TOML file (flags still take precedence)
//! brokerd --config /etc/broker.toml
//! BROKER_CONFIG=/etc/broker.toml brokerd
//!
//! # Enable debug logging
//! RUST_LOG=brokerd=debug brokerd 10
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown; connected clients are closed and
//!   their units returned to the pool

use std::env;
use std::ffi::OsString;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use brokerd::accounts::Accounts;
use brokerd::config::{BrokerConfig, ConfigOverrides, CONFIG_ENV_VAR};
use brokerd::reporter::spawn_status_reporter;
use brokerd::server::BrokerServer;

/// Resource broker daemon
#[derive(Parser, Debug)]
#[command(name = "brokerd", version, about)]
struct Args {
    /// Total units in the pool
    capacity: Option<u64>,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Maximum simultaneously connected clients
    #[arg(short = 'm', long)]
    max_clients: Option<usize>,

    /// Seconds between status reports
    #[arg(short = 'r', long)]
    report_interval: Option<u64>,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            capacity: self.capacity,
            bind_address: self.bind,
            port: self.port,
            max_clients: self.max_clients,
            report_interval_secs: self.report_interval,
        }
    }
}

/// Picks the config file: `--config` wins over the environment variable.
fn config_path(flag: Option<PathBuf>, env_value: Option<OsString>) -> Option<PathBuf> {
    flag.or_else(|| env_value.filter(|v| !v.is_empty()).map(PathBuf::from))
}

/// Resolves flags, config file and defaults into a validated config.
fn load_config(args: &Args) -> Result<BrokerConfig> {
    let file = match config_path(args.config.clone(), env::var_os(CONFIG_ENV_VAR)) {
        Some(path) => ConfigOverrides::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConfigOverrides::default(),
    };

    args.overrides()
        .or(file)
        .resolve()
        .context("Invalid configuration")
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    run_daemon(config)
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon(config: BrokerConfig) -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("brokerd=info".parse()?)
                .add_directive("broker_core=info".parse()?)
                .add_directive("broker_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "Broker daemon starting"
    );

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Setup signal handlers
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let accounts = Arc::new(Accounts::new(config.capacity, config.max_clients));

    let server = BrokerServer::bind(
        config.listen_addr(),
        Arc::clone(&accounts),
        cancel_token.clone(),
    )
    .await
    .context("Failed to start server")?;

    info!(
        addr = %server.local_addr()?,
        capacity = config.capacity,
        max_clients = config.max_clients,
        "Server started"
    );

    let reporter = spawn_status_reporter(
        Arc::clone(&accounts),
        config.report_interval(),
        cancel_token.clone(),
    );

    // Returns once every session has been reaped
    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    if let Err(e) = reporter.await {
        error!(error = %e, "Status reporter task failed");
    }

    info!("Broker daemon stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
