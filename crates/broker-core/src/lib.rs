//! Broker Core - Domain types for the resource broker
//!
//! This crate provides the client identity and per-client accounting
//! record used by the daemon (brokerd). The wire types live in
//! broker-protocol.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod client;
pub mod error;

// Re-exports for convenience
pub use client::{ClientId, ClientRecord, UsageDelta};
pub use error::{DomainError, DomainResult};
