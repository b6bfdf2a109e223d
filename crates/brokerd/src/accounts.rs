//! Combined ledger + registry accounting.
//!
//! Every operation that touches both the pool and a client's usage holds
//! both locks for its whole duration, so the conservation invariant
//! `available + sum(usage) == capacity` holds whenever neither lock is held.
//!
//! # Lock Order
//!
//! Ledger first, then registry. Nothing in this crate acquires them in the
//! other order, and no lock is held across network I/O.

use serde::Serialize;
use tracing::{debug, warn};

use broker_core::{ClientId, ClientRecord, UsageDelta};

use crate::ledger::Ledger;
use crate::registry::{Registry, RegistryError};

/// Result of a `REQUEST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Granted { amount: u64, available: u64 },
    Denied { amount: u64, available: u64 },
}

/// Result of a `RELEASE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseOutcome {
    /// Amount the client asked to release
    pub requested: u64,
    /// Amount actually credited back, never more than the client held
    pub released: u64,
    /// Pool level after the release
    pub available: u64,
    /// Client's usage after the release
    pub remaining: u64,
}

impl ReleaseOutcome {
    /// True if the client asked to release more than it held.
    pub fn was_clamped(&self) -> bool {
        self.released < self.requested
    }
}

/// Units reclaimed from a departed client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reclaimed {
    pub record: ClientRecord,
    pub available: u64,
}

/// Pool level and client records captured at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountsSnapshot {
    pub capacity: u64,
    pub available: u64,
    pub clients: Vec<ClientRecord>,
}

impl AccountsSnapshot {
    pub fn total_usage(&self) -> u64 {
        self.clients.iter().map(|c| c.usage).sum()
    }

    /// Checks `available + sum(usage) == capacity`.
    pub fn is_conserved(&self) -> bool {
        self.available
            .checked_add(self.total_usage())
            .is_some_and(|total| total == self.capacity)
    }
}

/// Shared accounting state for the whole broker.
#[derive(Debug)]
pub struct Accounts {
    ledger: Ledger,
    registry: Registry,
}

impl Accounts {
    /// Creates a full pool and an empty registry.
    pub fn new(capacity: u64, max_clients: usize) -> Self {
        Self {
            ledger: Ledger::new(capacity),
            registry: Registry::new(max_clients),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Registers a newly accepted client.
    ///
    /// # Errors
    ///
    /// - `RegistryError::Full` if `max_clients` are already connected
    /// - `RegistryError::AlreadyExists` if the id is taken
    pub async fn admit(&self, record: ClientRecord) -> Result<(), RegistryError> {
        self.registry.add(record).await
    }

    /// Grants `amount` units to `id` if the pool has them.
    ///
    /// A denial is a normal outcome, not an error; state is unchanged.
    pub async fn request(
        &self,
        id: ClientId,
        amount: u64,
    ) -> Result<RequestOutcome, RegistryError> {
        let mut pool = self.ledger.lock().await;
        let mut clients = self.registry.lock().await;

        clients.lookup(id)?;

        if !pool.try_allocate(amount) {
            return Ok(RequestOutcome::Denied {
                amount,
                available: pool.available(),
            });
        }

        if let Err(e) = clients.mutate_usage(id, UsageDelta::Increase(amount)) {
            pool.release(amount);
            return Err(e);
        }

        Ok(RequestOutcome::Granted {
            amount,
            available: pool.available(),
        })
    }

    /// Returns up to `amount` units from `id` to the pool.
    ///
    /// The amount is clamped to what the client holds, so the pool can
    /// never grow past its capacity.
    pub async fn release(
        &self,
        id: ClientId,
        amount: u64,
    ) -> Result<ReleaseOutcome, RegistryError> {
        let mut pool = self.ledger.lock().await;
        let mut clients = self.registry.lock().await;

        let held = clients.lookup(id)?.usage;
        let clamped = amount.min(held);

        let remaining = clients.mutate_usage(id, UsageDelta::Decrease(clamped))?;
        let released = pool.release(clamped);

        Ok(ReleaseOutcome {
            requested: amount,
            released,
            available: pool.available(),
            remaining,
        })
    }

    /// Removes `id` from the registry and returns everything it held.
    ///
    /// Returns `None` if the client was already gone; calling this twice
    /// for the same id credits the pool only once.
    pub async fn reap(&self, id: ClientId) -> Option<Reclaimed> {
        let mut pool = self.ledger.lock().await;
        let mut clients = self.registry.lock().await;

        let Some(record) = clients.remove(id) else {
            debug!(client_id = %id, "Client already reaped");
            return None;
        };

        pool.release(record.usage);
        Some(Reclaimed {
            record,
            available: pool.available(),
        })
    }

    /// Captures a consistent view of the pool and all clients.
    pub async fn snapshot(&self) -> AccountsSnapshot {
        let pool = self.ledger.lock().await;
        let clients = self.registry.lock().await;

        let snapshot = AccountsSnapshot {
            capacity: self.ledger.capacity(),
            available: pool.available(),
            clients: clients.snapshot(),
        };

        if !snapshot.is_conserved() {
            warn!(
                capacity = snapshot.capacity,
                available = snapshot.available,
                total_usage = snapshot.total_usage(),
                "Conservation check failed"
            );
        }

        snapshot
    }
}
