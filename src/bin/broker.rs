//! Broker client - sends a scripted sequence of requests and releases
//!
//! # Usage
//!
//! ```bash
//! # Take 4 units, wait 2 s, take 3 more, wait, hand back 4
//! broker 127.0.0.1 2 4 3 -- -4
//!
//! # Against a broker on another port
//! broker 127.0.0.1 1 5 --port 9000
//! ```
//!
//! Positive amounts are sent as `REQUEST n`, negative ones as `RELEASE n`.
//! Zero is skipped.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use broker_client::BrokerClient;
use broker_protocol::Command;

/// Resource broker client
#[derive(Parser, Debug)]
#[command(name = "broker", version, about)]
struct Args {
    /// Broker address
    server_ip: IpAddr,

    /// Seconds to wait after each command
    request_interval: u64,

    /// Amounts to send in order: positive requests, negative releases
    #[arg(required = true, allow_negative_numbers = true)]
    requests: Vec<i64>,

    /// Broker TCP port
    #[arg(short, long, default_value_t = 8080)]
    port: u16,
}

/// Maps a signed amount onto a command.
fn to_command(amount: i64) -> Option<Command> {
    match amount {
        0 => None,
        n if n > 0 => Some(Command::Request(n.unsigned_abs())),
        n => Some(Command::Release(n.unsigned_abs())),
    }
}

/// Log filter: `RUST_LOG`, plus warnings from this binary and the client library.
fn log_filter() -> Result<EnvFilter> {
    Ok(EnvFilter::from_default_env()
        .add_directive("broker=warn".parse()?)
        .add_directive("broker_client=warn".parse()?))
}

fn warn_skipped_zero(position: usize) {
    warn!(position, "Skipping zero amount");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter()?)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let addr = SocketAddr::new(args.server_ip, args.port);
    let interval = Duration::from_secs(args.request_interval);

    let mut client = BrokerClient::connect(addr)
        .await
        .context("Is brokerd running?")?;

    for (position, amount) in args.requests.into_iter().enumerate() {
        let Some(command) = to_command(amount) else {
            warn_skipped_zero(position + 1);
            continue;
        };

        let response = client
            .send(command)
            .await
            .with_context(|| format!("Failed to send {command}"))?;
        println!("Server: {response}");

        tokio::time::sleep(interval).await;
    }

    client.close().await?;
    Ok(())
}
