//! Broker Daemon - Resource ledger, client registry and connection server
//!
//! This crate provides the core infrastructure for the broker daemon:
//! - `ledger` - Guarded counter of available units
//! - `registry` - Guarded set of connected clients and their usage
//! - `accounts` - Ledger + registry operations under a fixed lock order
//! - `server` - TCP dispatcher and per-client session handler
//! - `reaper` - Returns a finished session's units to the pool
//! - `reporter` - Periodic consistent status snapshots
//! - `config` - Startup configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        brokerd                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  BrokerServer   │────▶│          Accounts           │   │
//! │  │  (TcpListener)  │     │  Ledger lock ─▶ Registry    │   │
//! │  └────────┬────────┘     └──────▲───────────────▲──────┘   │
//! │           │                     │               │          │
//! │           │ connections         │ grant/release │ snapshot │
//! │           ▼                     │               │          │
//! │  ┌─────────────────┐            │     ┌─────────┴───────┐  │
//! │  │ SessionHandler  │────────────┘     │ StatusReporter  │  │
//! │  │  (per client)   │──▶ Reaper        │  (every 5 s)    │  │
//! │  └─────────────────┘                  └─────────────────┘  │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`

pub mod accounts;
pub mod config;
pub mod ledger;
pub mod reaper;
pub mod registry;
pub mod reporter;
pub mod server;
