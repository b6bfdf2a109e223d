//! Termination reaper: returns a finished session's units to the pool.
//!
//! Each session future runs in its own task, supervised by a second task
//! that awaits it. However the session ends (clean EOF, transport error,
//! shutdown, panic) the supervisor observes it through the `JoinHandle`
//! and reaps the client exactly once. The dispatcher keeps the supervisors
//! in a `JoinSet` so shutdown can wait for every reap to finish.
//!
//! ```text
//! supervisor task ──spawn──▶ session task
//!       │                        │
//!       │◀──── JoinHandle ───────┘  Ok(exit) | Err(panic)
//!       ▼
//!  Accounts::reap(id)   (remove record + credit usage, one lock step)
//! ```

use std::future::Future;
use std::sync::Arc;

use tracing::{error, info};

use broker_core::ClientId;

use crate::accounts::{Accounts, Reclaimed};
use crate::server::SessionExit;

/// Runs `session` in its own task and reaps `client_id` when it ends.
///
/// Resolves to what was reclaimed. A panic inside `session` is contained
/// in the inner task and still leads to a reap.
pub async fn supervise<F>(
    accounts: Arc<Accounts>,
    client_id: ClientId,
    session: F,
) -> Option<Reclaimed>
where
    F: Future<Output = SessionExit> + Send + 'static,
{
    let exit = match tokio::spawn(session).await {
        Ok(exit) => exit,
        Err(e) => {
            error!(client_id = %client_id, error = %e, "Session task panicked");
            SessionExit::Panicked
        }
    };

    reap(&accounts, client_id, &exit).await
}

/// Removes the client and credits back everything it still held.
///
/// Safe to call more than once; only the first call has any effect.
pub async fn reap(
    accounts: &Accounts,
    client_id: ClientId,
    exit: &SessionExit,
) -> Option<Reclaimed> {
    let reclaimed = accounts.reap(client_id).await?;

    info!(
        client_id = %client_id,
        remote = %reclaimed.record.remote,
        reclaimed = reclaimed.record.usage,
        available = reclaimed.available,
        exit = ?exit,
        "Client disconnected"
    );

    Some(reclaimed)
}
