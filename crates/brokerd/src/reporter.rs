//! Periodic status reporting for the broker daemon.
//!
//! Every tick the reporter captures the pool level and every client's
//! usage in one step (both locks held, ledger first) and logs it. It never
//! writes to the shared state.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Serialization failures are logged, not propagated

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use broker_core::ClientId;

use crate::accounts::{Accounts, AccountsSnapshot};

/// One client's line in a status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientUsage {
    pub client_id: ClientId,
    pub remote_address: IpAddr,
    pub remote_port: u16,
    pub usage: u64,
}

/// Point-in-time view of the broker.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub timestamp: DateTime<Utc>,
    pub capacity: u64,
    pub available: u64,
    pub client_count: usize,
    pub clients: Vec<ClientUsage>,
}

impl StatusReport {
    /// Builds a report from a consistent accounts snapshot.
    pub fn from_snapshot(snapshot: AccountsSnapshot, timestamp: DateTime<Utc>) -> Self {
        let clients: Vec<ClientUsage> = snapshot
            .clients
            .iter()
            .map(|record| ClientUsage {
                client_id: record.id,
                remote_address: record.remote_address(),
                remote_port: record.remote_port(),
                usage: record.usage,
            })
            .collect();

        Self {
            timestamp,
            capacity: snapshot.capacity,
            available: snapshot.available,
            client_count: clients.len(),
            clients,
        }
    }

    /// Captures a report from live accounts.
    pub async fn capture(accounts: &Accounts) -> Self {
        Self::from_snapshot(accounts.snapshot().await, Utc::now())
    }

    /// Units currently held by clients.
    pub fn allocated(&self) -> u64 {
        self.clients.iter().map(|c| c.usage).sum()
    }

    /// Checks `available + allocated == capacity`.
    pub fn is_conserved(&self) -> bool {
        self.available
            .checked_add(self.allocated())
            .is_some_and(|total| total == self.capacity)
    }
}

/// Spawns the status reporter task.
///
/// Uses cooperative shutdown via CancellationToken.
///
/// # Returns
///
/// A join handle for the spawned task.
pub fn spawn_status_reporter(
    accounts: Arc<Accounts>,
    period: Duration,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = period.as_secs(), "Status reporter started");

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Status reporter shutting down");
                    break;
                }

                _ = tick.tick() => {
                    let report = StatusReport::capture(&accounts).await;
                    log_report(&report);
                }
            }
        }

        debug!("Status reporter task completed");
    })
}

/// Logs a report, warning if it does not balance.
fn log_report(report: &StatusReport) {
    let clients = serde_json::to_string(&report.clients).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to serialize client usage");
        String::from("[]")
    });

    if report.is_conserved() {
        info!(
            timestamp = %report.timestamp.to_rfc3339(),
            available = report.available,
            allocated = report.allocated(),
            client_count = report.client_count,
            clients = %clients,
            "Broker status"
        );
    } else {
        warn!(
            timestamp = %report.timestamp.to_rfc3339(),
            capacity = report.capacity,
            available = report.available,
            allocated = report.allocated(),
            client_count = report.client_count,
            clients = %clients,
            "UNBALANCED: available + allocated does not match capacity"
        );
    }
}
