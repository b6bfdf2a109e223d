//! Error types for the broker client.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use broker_protocol::ParseError;

/// Client errors.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Could not reach the broker.
    ///
    /// Usually the daemon is not running or is listening on another port.
    #[error("Failed to connect to broker at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Read or write failed on an established connection.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The broker closed the connection before answering.
    #[error("Connection closed by broker")]
    Closed,

    /// The broker sent a line that is not a valid response.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ParseError),
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
