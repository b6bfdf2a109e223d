//! Resource ledger: the guarded counter of available units.
//!
//! The ledger knows nothing about clients. Callers that need to keep the
//! pool and per-client usage in step go through [`crate::accounts::Accounts`],
//! which holds this lock together with the registry lock.
//!
//! There is no queueing: a request larger than what is available is denied
//! at once. Under heavy contention from many small grants a large request
//! may keep being denied; this broker does not attempt fairness.

use tokio::sync::{Mutex, MutexGuard};

/// The pool counter, only reachable through a [`Ledger`] lock.
#[derive(Debug)]
pub struct Pool {
    available: u64,
}

impl Pool {
    /// Units currently unallocated.
    pub fn available(&self) -> u64 {
        self.available
    }

    /// Takes `amount` units if that many are available.
    ///
    /// Returns false and leaves the pool unchanged otherwise.
    pub fn try_allocate(&mut self, amount: u64) -> bool {
        match self.available.checked_sub(amount) {
            Some(rest) => {
                self.available = rest;
                true
            }
            None => false,
        }
    }

    /// Credits `amount` units back unconditionally, returning the amount credited.
    ///
    /// The caller is responsible for clamping against what the releasing
    /// client actually holds.
    pub fn release(&mut self, amount: u64) -> u64 {
        self.available = self.available.saturating_add(amount);
        amount
    }
}

/// Mutex-guarded resource pool.
#[derive(Debug)]
pub struct Ledger {
    capacity: u64,
    pool: Mutex<Pool>,
}

impl Ledger {
    /// Creates a full pool of `capacity` units.
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            pool: Mutex::new(Pool {
                available: capacity,
            }),
        }
    }

    /// Total configured capacity.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Acquires the ledger lock.
    ///
    /// Lock order: always take this before the registry lock.
    pub async fn lock(&self) -> MutexGuard<'_, Pool> {
        self.pool.lock().await
    }

    pub async fn try_allocate(&self, amount: u64) -> bool {
        self.lock().await.try_allocate(amount)
    }

    pub async fn release(&self, amount: u64) -> u64 {
        self.lock().await.release(amount)
    }

    pub async fn available(&self) -> u64 {
        self.lock().await.available()
    }
}
