//! Broker Client - Async client for the resource broker
//!
//! Connects over TCP and exchanges one command line for one response line.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

pub mod client;
pub mod error;

pub use client::BrokerClient;
pub use error::{ClientError, Result};
