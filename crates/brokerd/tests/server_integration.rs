//! Integration tests for the TCP broker server.
//!
//! These tests run a real BrokerServer on a loopback port and drive it with
//! real clients, checking responses, cleanup on disconnect, connection
//! limits and graceful shutdown.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use broker_client::{BrokerClient, ClientError};
use broker_protocol::Response;
use brokerd::accounts::Accounts;
use brokerd::server::{BrokerServer, ServerError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for the server to reach an expected state
const STATE_WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Interval between state checks
const STATE_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test server context that manages server lifecycle.
struct TestServer {
    addr: SocketAddr,
    accounts: Arc<Accounts>,
    cancel_token: CancellationToken,
    task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    /// Spawns a server on an ephemeral loopback port.
    async fn spawn(capacity: u64, max_clients: usize) -> Self {
        let accounts = Arc::new(Accounts::new(capacity, max_clients));
        let cancel_token = CancellationToken::new();

        let server = BrokerServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::clone(&accounts),
            cancel_token.clone(),
        )
        .await
        .expect("bind server");
        let addr = server.local_addr().expect("local addr");

        let task = tokio::spawn(server.run());

        TestServer {
            addr,
            accounts,
            cancel_token,
            task,
        }
    }

    async fn connect(&self) -> BrokerClient {
        BrokerClient::connect(self.addr)
            .await
            .expect("connect to server")
    }

    async fn available(&self) -> u64 {
        self.accounts.ledger().available().await
    }

    async fn client_count(&self) -> usize {
        self.accounts.registry().len().await
    }

    /// Polls until the registry holds `count` clients and the pool holds `available`.
    async fn wait_for(&self, count: usize, available: u64) {
        let start = tokio::time::Instant::now();
        while start.elapsed() < STATE_WAIT_TIMEOUT {
            if self.client_count().await == count && self.available().await == available {
                return;
            }
            sleep(STATE_POLL_INTERVAL).await;
        }

        panic!(
            "Expected {count} clients and {available} available, got {} and {}",
            self.client_count().await,
            self.available().await
        );
    }

    /// Cancels the server and waits for `run` to return.
    async fn shutdown(self) -> Arc<Accounts> {
        self.cancel_token.cancel();
        timeout(STATE_WAIT_TIMEOUT, self.task)
            .await
            .expect("server stops after cancel")
            .expect("server task joins")
            .expect("server runs cleanly");
        self.accounts
    }
}

// ============================================================================
// Scenario
// ============================================================================

#[tokio::test]
async fn test_two_client_scenario() {
    let server = TestServer::spawn(10, 10).await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;

    assert_eq!(a.request(4).await.unwrap(), Response::Granted(4));
    assert_eq!(server.available().await, 6);

    assert_eq!(b.request(7).await.unwrap(), Response::insufficient(7, 6));
    assert_eq!(server.available().await, 6);

    assert_eq!(a.release(4).await.unwrap(), Response::Released(4));
    assert_eq!(server.available().await, 10);

    assert_eq!(b.request(7).await.unwrap(), Response::Granted(7));
    assert_eq!(server.available().await, 3);

    // Abrupt disconnect while holding 7
    drop(b);
    server.wait_for(1, 10).await;

    a.close().await.unwrap();
    server.wait_for(0, 10).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_denied_response_wire_text() {
    let server = TestServer::spawn(5, 10).await;
    let mut client = server.connect().await;

    let response = client.send_line("REQUEST 6").await.unwrap();
    assert_eq!(
        response.to_string(),
        "DENIED 6, REASON: insufficient resources (available: 5)"
    );

    server.shutdown().await;
}

// ============================================================================
// Protocol Errors
// ============================================================================

#[tokio::test]
async fn test_protocol_errors_are_answered_and_session_continues() {
    let server = TestServer::spawn(10, 10).await;
    let mut client = server.connect().await;

    let cases = [
        ("HELLO", "unrecognized command"),
        ("5", "unrecognized command"),
        ("", "unrecognized command"),
        ("REQUEST 0", "amount must be a positive integer"),
        ("RELEASE -3", "amount must be a positive integer"),
        ("REQUEST many", "invalid amount"),
        ("REQUEST", "missing amount"),
    ];

    for (line, reason) in cases {
        let response = client.send_line(line).await.unwrap();
        assert_eq!(response, Response::error(reason), "line {line:?}");
    }

    assert_eq!(client.request(1).await.unwrap(), Response::Granted(1));
    assert_eq!(server.available().await, 9);

    server.shutdown().await;
}

#[tokio::test]
async fn test_lowercase_and_crlf_accepted() {
    let server = TestServer::spawn(10, 10).await;
    let mut client = server.connect().await;

    assert_eq!(
        client.send_line("request 2\r").await.unwrap(),
        Response::Granted(2)
    );
    assert_eq!(
        client.send_line("Release 2").await.unwrap(),
        Response::Released(2)
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_overlong_line_is_rejected_and_session_continues() {
    let server = TestServer::spawn(10, 10).await;
    let mut client = server.connect().await;

    let long = "X".repeat(5000);
    assert_eq!(
        client.send_line(&long).await.unwrap(),
        Response::error("message too long")
    );

    assert_eq!(client.request(3).await.unwrap(), Response::Granted(3));

    server.shutdown().await;
}

#[tokio::test]
async fn test_coalesced_commands_get_one_response_each() {
    let server = TestServer::spawn(10, 10).await;
    let stream = TcpStream::connect(server.addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    writer
        .write_all(b"REQUEST 2\nREQUEST 3\nRELEASE 1\n")
        .await
        .unwrap();

    let mut responses = Vec::new();
    for _ in 0..3 {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        responses.push(line);
    }

    assert_eq!(responses, vec!["GRANTED 2\n", "GRANTED 3\n", "RELEASED 1\n"]);
    assert_eq!(server.available().await, 6);

    server.shutdown().await;
}

// ============================================================================
// Release Clamping
// ============================================================================

#[tokio::test]
async fn test_over_release_is_clamped() {
    let server = TestServer::spawn(10, 10).await;
    let mut client = server.connect().await;

    assert_eq!(client.request(3).await.unwrap(), Response::Granted(3));
    assert_eq!(client.release(10).await.unwrap(), Response::Released(3));
    assert_eq!(server.available().await, 10);

    assert_eq!(client.release(1).await.unwrap(), Response::Released(0));
    assert_eq!(server.available().await, 10);

    server.shutdown().await;
}

#[tokio::test]
async fn test_one_client_cannot_release_anothers_units() {
    let server = TestServer::spawn(10, 10).await;
    let mut holder = server.connect().await;
    let mut thief = server.connect().await;

    assert_eq!(holder.request(8).await.unwrap(), Response::Granted(8));
    assert_eq!(thief.release(8).await.unwrap(), Response::Released(0));
    assert_eq!(server.available().await, 2);

    server.shutdown().await;
}

// ============================================================================
// Cleanup
// ============================================================================

#[tokio::test]
async fn test_disconnect_mid_line_returns_units() {
    let server = TestServer::spawn(10, 10).await;
    let stream = TcpStream::connect(server.addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    writer.write_all(b"REQUEST 5\n").await.unwrap();
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    assert_eq!(line, "GRANTED 5\n");
    assert_eq!(server.available().await, 5);

    writer.write_all(b"REQ").await.unwrap();
    drop(writer);
    drop(reader);

    server.wait_for(0, 10).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_reclaims_held_units() {
    let server = TestServer::spawn(10, 10).await;
    let mut first = server.connect().await;
    let mut second = server.connect().await;
    assert_eq!(first.request(6).await.unwrap(), Response::Granted(6));
    assert_eq!(second.request(3).await.unwrap(), Response::Granted(3));

    // Every holding is back by the time run() returns, without polling
    let accounts = server.shutdown().await;
    let snapshot = accounts.snapshot().await;
    assert!(snapshot.clients.is_empty());
    assert_eq!(snapshot.available, 10);

    for client in [&mut first, &mut second] {
        let err = client.recv().await.unwrap_err();
        assert!(matches!(err, ClientError::Closed | ClientError::Io(_)));
    }
}

// ============================================================================
// Connection Limit
// ============================================================================

#[tokio::test]
async fn test_registry_full_rejects_connection() {
    let server = TestServer::spawn(10, 2).await;

    let mut first = server.connect().await;
    let mut second = server.connect().await;
    assert!(first.request(1).await.unwrap().is_granted());
    assert!(second.request(1).await.unwrap().is_granted());

    let mut third = server.connect().await;
    let response = timeout(STATE_WAIT_TIMEOUT, third.recv())
        .await
        .expect("rejection line")
        .unwrap();
    assert_eq!(response, Response::error("too many clients (max: 2)"));

    let closed = timeout(STATE_WAIT_TIMEOUT, third.recv())
        .await
        .expect("connection close");
    assert!(closed.is_err());

    assert_eq!(server.client_count().await, 2);
    assert_eq!(server.available().await, 8);

    // Freeing a slot admits the next client
    first.close().await.unwrap();
    server.wait_for(1, 9).await;

    let mut fourth = server.connect().await;
    assert_eq!(fourth.request(2).await.unwrap(), Response::Granted(2));

    server.shutdown().await;
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_clients_preserve_conservation() {
    const CLIENTS: u64 = 8;
    const CAPACITY: u64 = 30;

    let server = TestServer::spawn(CAPACITY, CLIENTS as usize).await;

    let sampler_accounts = Arc::clone(&server.accounts);
    let sampler_stop = CancellationToken::new();
    let sampler_token = sampler_stop.clone();
    let sampler = tokio::spawn(async move {
        let mut samples = 0u32;
        loop {
            let snapshot = sampler_accounts.snapshot().await;
            assert!(snapshot.is_conserved(), "unbalanced snapshot: {snapshot:?}");
            samples += 1;
            if sampler_token.is_cancelled() {
                break;
            }
            tokio::task::yield_now().await;
        }
        samples
    });

    let mut tasks = Vec::new();
    for n in 0..CLIENTS {
        let addr = server.addr;
        tasks.push(tokio::spawn(async move {
            let mut client = BrokerClient::connect(addr).await.unwrap();
            for round in 0..40u64 {
                let amount = (n * 7 + round * 3) % 9 + 1;
                let response = if round % 3 == 1 {
                    client.release(amount).await.unwrap()
                } else {
                    client.request(amount).await.unwrap()
                };
                assert!(!matches!(response, Response::Error { .. }));
            }
            // Half the clients leave without releasing
            if n % 2 == 0 {
                client.close().await.unwrap();
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    server.wait_for(0, CAPACITY).await;

    sampler_stop.cancel();
    assert!(sampler.await.unwrap() > 0);

    server.shutdown().await;
}
