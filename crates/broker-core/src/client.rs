//! Per-connection client identity and accounting record.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::Serialize;

use crate::error::{DomainError, DomainResult};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Opaque identifier for one accepted connection.
///
/// Assigned by the dispatcher from a monotonically increasing counter,
/// so identifiers are never reused within one process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ClientId(u64);

impl ClientId {
    /// Creates a ClientId from a connection number.
    pub const fn new(connection_number: u64) -> Self {
        Self(connection_number)
    }

    /// Returns the underlying connection number.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

// ============================================================================
// Usage Changes
// ============================================================================

/// A change to the number of units a client holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageDelta {
    Increase(u64),
    Decrease(u64),
}

impl fmt::Display for UsageDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageDelta::Increase(n) => write!(f, "+{n}"),
            UsageDelta::Decrease(n) => write!(f, "-{n}"),
        }
    }
}

// ============================================================================
// Client Record
// ============================================================================

/// Accounting record for one connected client.
///
/// `usage` is the number of units this client currently holds. It is only
/// changed by the client's own session, through the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientRecord {
    pub id: ClientId,
    pub usage: u64,
    pub remote: SocketAddr,
}

impl ClientRecord {
    /// Creates a record for a freshly accepted connection, holding nothing.
    pub fn new(id: ClientId, remote: SocketAddr) -> Self {
        Self {
            id,
            usage: 0,
            remote,
        }
    }

    /// Peer IP address.
    pub fn remote_address(&self) -> IpAddr {
        self.remote.ip()
    }

    /// Peer port.
    pub fn remote_port(&self) -> u16 {
        self.remote.port()
    }

    /// Applies a change to `usage`, returning the new value.
    ///
    /// The record is left untouched if the result would be negative
    /// or overflow.
    pub fn apply_delta(&mut self, delta: UsageDelta) -> DomainResult<u64> {
        let next = match delta {
            UsageDelta::Increase(n) => self.usage.checked_add(n),
            UsageDelta::Decrease(n) => self.usage.checked_sub(n),
        };

        let next = next.ok_or(DomainError::InvalidUsageChange {
            client_id: self.id,
            usage: self.usage,
            delta,
        })?;

        self.usage = next;
        Ok(next)
    }
}
