//! Connection to a running broker.

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use broker_protocol::{Command, Response};

use crate::error::{ClientError, Result};

/// An open connection to the broker.
pub struct BrokerClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
}

impl BrokerClient {
    /// Connects to the broker at `addr`.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect { addr, source })?;
        let (reader, writer) = stream.into_split();

        debug!(peer = %addr, "Connected to broker");

        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            peer: addr,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Sends `REQUEST amount`.
    pub async fn request(&mut self, amount: u64) -> Result<Response> {
        self.send(Command::Request(amount)).await
    }

    /// Sends `RELEASE amount`.
    pub async fn release(&mut self, amount: u64) -> Result<Response> {
        self.send(Command::Release(amount)).await
    }

    pub async fn send(&mut self, command: Command) -> Result<Response> {
        self.send_line(&command.to_string()).await
    }

    /// Sends a raw line and waits for the response.
    ///
    /// `line` must not contain a newline.
    pub async fn send_line(&mut self, line: &str) -> Result<Response> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        self.recv().await
    }

    /// Reads one response line.
    pub async fn recv(&mut self) -> Result<Response> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(ClientError::Closed);
        }

        let response = Response::parse(&line)?;
        debug!(peer = %self.peer, %response, "Received response");
        Ok(response)
    }

    /// Closes the write side, letting the broker see a clean EOF.
    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
