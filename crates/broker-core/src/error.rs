//! Domain-specific error types following panic-free policy.

use crate::{ClientId, UsageDelta};
use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Usage change would take a client's holding below zero or past `u64::MAX`
    #[error("Invalid usage change for {client_id}: usage {usage}, delta {delta}")]
    InvalidUsageChange {
        client_id: ClientId,
        usage: u64,
        delta: UsageDelta,
    },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
