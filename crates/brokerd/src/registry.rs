//! Client registry: the set of connected clients and what each one holds.
//!
//! Guarded by its own lock, separate from the ledger's. When both are
//! needed, the ledger lock is taken first (see [`crate::accounts`]).

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use broker_core::{ClientId, ClientRecord, DomainError, UsageDelta};

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Too many clients (max: {max})")]
    Full { max: usize },

    #[error("Client already registered: {client_id}")]
    AlreadyExists { client_id: ClientId },

    #[error("Client not found: {client_id}")]
    NotFound { client_id: ClientId },

    #[error(transparent)]
    Usage(#[from] DomainError),
}

/// Bounded table of client records, only reachable through a [`Registry`] lock.
#[derive(Debug)]
pub struct ClientTable {
    max_clients: usize,
    records: HashMap<ClientId, ClientRecord>,
}

impl ClientTable {
    /// Inserts a new record.
    pub fn add(&mut self, record: ClientRecord) -> Result<(), RegistryError> {
        if self.records.contains_key(&record.id) {
            return Err(RegistryError::AlreadyExists {
                client_id: record.id,
            });
        }
        if self.records.len() >= self.max_clients {
            return Err(RegistryError::Full {
                max: self.max_clients,
            });
        }

        debug!(client_id = %record.id, remote = %record.remote, "Client registered");
        self.records.insert(record.id, record);
        Ok(())
    }

    /// Removes a record, returning it if it was present.
    ///
    /// Removing an absent id is a no-op, so repeated removal is harmless.
    pub fn remove(&mut self, id: ClientId) -> Option<ClientRecord> {
        self.records.remove(&id)
    }

    pub fn lookup(&self, id: ClientId) -> Result<&ClientRecord, RegistryError> {
        self.records
            .get(&id)
            .ok_or(RegistryError::NotFound { client_id: id })
    }

    /// Applies a change to a client's usage, returning the new usage.
    pub fn mutate_usage(&mut self, id: ClientId, delta: UsageDelta) -> Result<u64, RegistryError> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or(RegistryError::NotFound { client_id: id })?;
        Ok(record.apply_delta(delta)?)
    }

    /// Copies all records, ordered by client id.
    pub fn snapshot(&self) -> Vec<ClientRecord> {
        let mut records: Vec<ClientRecord> = self.records.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Sum of all clients' usage.
    pub fn total_usage(&self) -> u64 {
        self.records.values().map(|r| r.usage).sum()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Mutex-guarded client registry.
#[derive(Debug)]
pub struct Registry {
    table: Mutex<ClientTable>,
}

impl Registry {
    /// Creates an empty registry holding at most `max_clients` records.
    pub fn new(max_clients: usize) -> Self {
        Self {
            table: Mutex::new(ClientTable {
                max_clients,
                records: HashMap::with_capacity(max_clients),
            }),
        }
    }

    /// Acquires the registry lock.
    ///
    /// Lock order: never take the ledger lock while holding this one.
    pub async fn lock(&self) -> MutexGuard<'_, ClientTable> {
        self.table.lock().await
    }

    pub async fn add(&self, record: ClientRecord) -> Result<(), RegistryError> {
        self.lock().await.add(record)
    }

    pub async fn remove(&self, id: ClientId) -> Option<ClientRecord> {
        self.lock().await.remove(id)
    }

    pub async fn lookup(&self, id: ClientId) -> Result<ClientRecord, RegistryError> {
        self.lock().await.lookup(id).cloned()
    }

    pub async fn mutate_usage(
        &self,
        id: ClientId,
        delta: UsageDelta,
    ) -> Result<u64, RegistryError> {
        self.lock().await.mutate_usage(id, delta)
    }

    pub async fn snapshot(&self) -> Vec<ClientRecord> {
        self.lock().await.snapshot()
    }

    pub async fn len(&self) -> usize {
        self.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.lock().await.is_empty()
    }
}
