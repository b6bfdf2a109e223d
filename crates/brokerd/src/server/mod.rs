//! TCP server for the broker daemon.
//!
//! The server:
//! - Listens on a TCP socket for client connections
//! - Registers each client before any of its commands are read
//! - Spawns a supervised SessionHandler task per client
//! - Rejects connections beyond `max_clients` without starting a handler
//! - Supports graceful shutdown via CancellationToken, waiting for every
//!   session to be reaped before `run` returns
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  BrokerServer   │
//! │  TcpListener    │
//! └───────┬─────────┘
//!         │ accept() + Accounts::admit()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ SessionHandler  │────▶│    Accounts     │
//! │  (per client)   │     │ Ledger+Registry │
//! └───────┬─────────┘     └────────▲────────┘
//!         │ exit / panic           │
//!         ▼                        │
//! ┌─────────────────┐              │
//! │     Reaper      │──────────────┘
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and the loop continues

mod session;

pub use session::{SessionError, SessionExit, SessionHandler, SessionState};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use broker_core::{ClientId, ClientRecord};
use broker_protocol::Response;

use crate::accounts::{Accounts, Reclaimed};
use crate::reaper;
use crate::registry::RegistryError;

/// How long a rejected client gets to receive its error line.
const REJECT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection dispatcher.
///
/// Owns the listening socket; everything shared between sessions lives
/// in [`Accounts`].
pub struct BrokerServer {
    listener: TcpListener,

    accounts: Arc<Accounts>,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for generating client IDs
    connection_counter: AtomicU64,

    /// Session supervisors, each resolving once its client is reaped
    sessions: JoinSet<Option<Reclaimed>>,
}

impl BrokerServer {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// `ServerError::Bind` if the address cannot be bound. This is fatal
    /// at startup.
    pub async fn bind(
        addr: SocketAddr,
        accounts: Arc<Accounts>,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                error: e.to_string(),
            })?;

        Ok(Self {
            listener,
            accounts,
            cancel_token,
            connection_counter: AtomicU64::new(1),
            sessions: JoinSet::new(),
        })
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::LocalAddr(e.to_string()))
    }

    /// Runs the accept loop until the cancellation token is triggered.
    ///
    /// After cancellation every open session is told to stop, and this
    /// returns only once all of them have been reaped.
    pub async fn run(mut self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr()?, "Broker server listening");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, remote)) => self.handle_connection(stream, remote).await,
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Continue accepting other connections
                        }
                    }
                }

                Some(result) = self.sessions.join_next(), if !self.sessions.is_empty() => {
                    log_supervisor_result(result);
                }
            }
        }

        info!(
            sessions = self.sessions.len(),
            "Server stopped accepting connections, draining sessions"
        );

        while let Some(result) = self.sessions.join_next().await {
            log_supervisor_result(result);
        }

        info!("All sessions reaped");
        Ok(())
    }

    /// Registers a new client and starts its session, or rejects it.
    ///
    /// Returns without waiting for the session.
    async fn handle_connection(&mut self, stream: TcpStream, remote: SocketAddr) {
        let client_id = ClientId::new(self.connection_counter.fetch_add(1, Ordering::Relaxed));

        match self.accounts.admit(ClientRecord::new(client_id, remote)).await {
            Ok(()) => {}
            Err(e @ RegistryError::Full { .. }) => {
                warn!(
                    remote_address = %remote.ip(),
                    remote_port = remote.port(),
                    "Max clients reached. Connection rejected"
                );
                tokio::spawn(reject(stream, Response::error(e.to_string().to_lowercase())));
                return;
            }
            Err(e) => {
                error!(client_id = %client_id, error = %e, "Failed to register client");
                return;
            }
        }

        info!(client_id = %client_id, remote = %remote, "Client connected");

        let (reader, writer) = stream.into_split();
        let handler = SessionHandler::new(
            client_id,
            reader,
            writer,
            Arc::clone(&self.accounts),
            self.cancel_token.clone(),
        );

        self.sessions.spawn(reaper::supervise(
            Arc::clone(&self.accounts),
            client_id,
            handler.run(),
        ));
    }
}

/// Logs a supervisor that failed before it could report a reap.
fn log_supervisor_result(result: Result<Option<Reclaimed>, tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "Session supervisor failed");
    }
}

/// Sends a final error line to a rejected client, then closes it.
async fn reject(mut stream: TcpStream, response: Response) {
    let line = format!("{response}\n");

    let result = timeout(REJECT_WRITE_TIMEOUT, async {
        stream.write_all(line.as_bytes()).await?;
        stream.shutdown().await
    })
    .await;

    if !matches!(result, Ok(Ok(()))) {
        warn!("Failed to notify rejected client");
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("Failed to read local address: {0}")]
    LocalAddr(String),
}
