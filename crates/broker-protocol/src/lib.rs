//! Broker Protocol - Line protocol for broker communication
//!
//! Clients send one command per line and receive exactly one response
//! line per command:
//!
//! ```text
//! REQUEST <n>   -> GRANTED <n> | DENIED <n>, REASON: <text>
//! RELEASE <n>   -> RELEASED <n>
//! <other>       -> ERROR, REASON: <text>
//! ```
//!
//! Lines are terminated by `\n`; a trailing `\r` is ignored.

pub mod command;
pub mod response;

pub use command::{Command, ParseError};
pub use response::Response;

/// Maximum length of one protocol line, excluding the terminator.
pub const MAX_LINE_LENGTH: usize = 1024;
