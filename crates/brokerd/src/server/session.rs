//! Session handler for individual client connections.
//!
//! Each accepted connection gets its own `SessionHandler` that:
//! - Reads one newline-terminated command at a time
//! - Applies it to the shared [`Accounts`]
//! - Writes exactly one response line per command
//!
//! The handler never performs cleanup itself. Whatever the client still
//! holds when `run` returns (or when the task panics) is reclaimed by the
//! [`crate::reaper`].
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Protocol errors are answered and the loop continues
//! - Transport errors end the session

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use broker_core::ClientId;
use broker_protocol::{Command, ParseError, Response, MAX_LINE_LENGTH};

use crate::accounts::{Accounts, RequestOutcome};
use crate::registry::RegistryError;

/// Write timeout per response (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bytes read per attempt, enough for a maximal line plus `\r\n`
const READ_LIMIT: u64 = MAX_LINE_LENGTH as u64 + 2;

/// Where a session is in its command loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitCommand,
    Processing,
    Closed,
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionExit {
    /// Client closed the connection cleanly
    PeerClosed,

    /// Server is shutting down
    Shutdown,

    /// Read or write failed
    Transport(SessionError),

    /// The session task panicked
    Panicked,
}

/// One inbound frame.
enum Frame {
    Line(String),
    TooLong,
}

/// Command loop for a single client.
pub struct SessionHandler {
    client_id: ClientId,
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    accounts: Arc<Accounts>,
    cancel_token: CancellationToken,
    state: SessionState,
}

impl SessionHandler {
    /// Creates a handler for an already registered client.
    pub fn new(
        client_id: ClientId,
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        accounts: Arc<Accounts>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            client_id,
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            accounts,
            cancel_token,
            state: SessionState::AwaitCommand,
        }
    }

    /// Runs the command loop until the client goes away or the server stops.
    pub async fn run(mut self) -> SessionExit {
        debug!(client_id = %self.client_id, "Session started");

        let exit = match self.process_commands().await {
            Ok(exit) => exit,
            Err(e) => {
                debug!(client_id = %self.client_id, error = %e, "Session transport failure");
                SessionExit::Transport(e)
            }
        };

        self.transition(SessionState::Closed);
        exit
    }

    async fn process_commands(&mut self) -> Result<SessionExit, SessionError> {
        let cancel_token = self.cancel_token.clone();

        loop {
            self.transition(SessionState::AwaitCommand);

            let frame = tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    debug!(client_id = %self.client_id, "Session cancelled by shutdown");
                    return Ok(SessionExit::Shutdown);
                }

                frame = self.read_frame() => frame?,
            };

            let Some(frame) = frame else {
                debug!(client_id = %self.client_id, "Client sent EOF");
                return Ok(SessionExit::PeerClosed);
            };

            self.transition(SessionState::Processing);

            let response = match frame {
                Frame::Line(line) => self.handle_line(&line).await?,
                Frame::TooLong => {
                    let err = ParseError::TooLong {
                        max: MAX_LINE_LENGTH,
                    };
                    warn!(client_id = %self.client_id, error = %err, "Protocol error");
                    Response::from(&err)
                }
            };

            self.send_response(&response).await?;
        }
    }

    /// Parses and applies one command line.
    async fn handle_line(&self, line: &str) -> Result<Response, SessionError> {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => {
                warn!(client_id = %self.client_id, error = %e, "Protocol error");
                return Ok(Response::from(&e));
            }
        };

        debug!(client_id = %self.client_id, %command, "Received command");

        let response = match command {
            Command::Request(amount) => match self.accounts.request(self.client_id, amount).await? {
                RequestOutcome::Granted { amount, available } => {
                    debug!(client_id = %self.client_id, amount, available, "Granted");
                    Response::Granted(amount)
                }
                RequestOutcome::Denied { amount, available } => {
                    debug!(client_id = %self.client_id, amount, available, "Denied");
                    Response::insufficient(amount, available)
                }
            },

            Command::Release(amount) => {
                let outcome = self.accounts.release(self.client_id, amount).await?;
                if outcome.was_clamped() {
                    warn!(
                        client_id = %self.client_id,
                        requested = outcome.requested,
                        released = outcome.released,
                        "Release exceeds holding, clamped"
                    );
                } else {
                    debug!(
                        client_id = %self.client_id,
                        amount = outcome.released,
                        available = outcome.available,
                        "Released"
                    );
                }
                Response::Released(outcome.released)
            }
        };

        Ok(response)
    }

    /// Reads one line, returning `None` on clean EOF.
    ///
    /// A line longer than `MAX_LINE_LENGTH` is consumed up to its newline and
    /// reported as `Frame::TooLong` so the session can carry on.
    async fn read_frame(&mut self) -> Result<Option<Frame>, SessionError> {
        let mut buf = Vec::new();
        let n = (&mut self.reader)
            .take(READ_LIMIT)
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| SessionError::Io(e.to_string()))?;

        if n == 0 {
            return Ok(None);
        }

        if buf.last() != Some(&b'\n') {
            if n as u64 == READ_LIMIT {
                self.discard_line().await?;
                return Ok(Some(Frame::TooLong));
            }
            return Err(SessionError::UnexpectedEof);
        }

        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }

        if buf.len() > MAX_LINE_LENGTH {
            return Ok(Some(Frame::TooLong));
        }

        Ok(Some(Frame::Line(String::from_utf8_lossy(&buf).into_owned())))
    }

    /// Skips input up to and including the next newline.
    async fn discard_line(&mut self) -> Result<(), SessionError> {
        loop {
            let mut sink = Vec::new();
            let n = (&mut self.reader)
                .take(READ_LIMIT)
                .read_until(b'\n', &mut sink)
                .await
                .map_err(|e| SessionError::Io(e.to_string()))?;

            if n == 0 {
                return Err(SessionError::UnexpectedEof);
            }
            if sink.last() == Some(&b'\n') {
                return Ok(());
            }
        }
    }

    /// Writes one response line.
    async fn send_response(&mut self, response: &Response) -> Result<(), SessionError> {
        let line = response.to_string();
        let writer = &mut self.writer;

        match timeout(WRITE_TIMEOUT, async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SessionError::Io(e.to_string())),
            Err(_) => Err(SessionError::WriteTimeout),
        }
    }

    fn transition(&mut self, next: SessionState) {
        trace!(client_id = %self.client_id, from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }
}

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed mid-line")]
    UnexpectedEof,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}
