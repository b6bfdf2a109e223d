//! Property-based tests for the accounting invariants.
//!
//! Random REQUEST/RELEASE scripts run concurrently against one `Accounts`
//! while a sampler takes snapshots. Every snapshot must balance, the pool
//! must never go negative, and once every client is reaped the pool must
//! be full again.

use std::sync::Arc;

use proptest::collection::vec;
use proptest::prelude::*;

use broker_core::{ClientId, ClientRecord};
use brokerd::accounts::{Accounts, RequestOutcome};
use tokio_util::sync::CancellationToken;

const CAPACITY: u64 = 20;

#[derive(Debug, Clone, Copy)]
enum Op {
    Request(u64),
    Release(u64),
}

/// Strategy for one client operation, amounts bounded by capacity
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1..=CAPACITY).prop_map(Op::Request),
        (1..=CAPACITY).prop_map(Op::Release),
    ]
}

/// Strategy for a set of client scripts
fn scripts_strategy() -> impl Strategy<Value = Vec<Vec<Op>>> {
    vec(vec(op_strategy(), 1..40), 1..8)
}

/// Runs every script on its own task and returns the final accounts.
fn run_scripts(scripts: Vec<Vec<Op>>) -> (Arc<Accounts>, u32) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async move {
        let accounts = Arc::new(Accounts::new(CAPACITY, scripts.len()));

        let stop = CancellationToken::new();
        let sampler = {
            let accounts = Arc::clone(&accounts);
            let stop = stop.clone();
            tokio::spawn(async move {
                let mut samples = 0u32;
                loop {
                    let snapshot = accounts.snapshot().await;
                    assert!(snapshot.is_conserved(), "unbalanced: {snapshot:?}");
                    assert!(snapshot.available <= snapshot.capacity);
                    samples += 1;
                    if stop.is_cancelled() {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
                samples
            })
        };

        let mut tasks = Vec::new();
        for (n, script) in scripts.into_iter().enumerate() {
            let accounts = Arc::clone(&accounts);
            tasks.push(tokio::spawn(async move {
                let id = ClientId::new(n as u64);
                let remote = "127.0.0.1:40000".parse().unwrap();
                accounts.admit(ClientRecord::new(id, remote)).await.unwrap();

                let mut held = 0u64;
                for op in script {
                    match op {
                        Op::Request(amount) => match accounts.request(id, amount).await.unwrap() {
                            RequestOutcome::Granted { .. } => held += amount,
                            RequestOutcome::Denied { available, .. } => {
                                assert!(available < amount)
                            }
                        },
                        Op::Release(amount) => {
                            let outcome = accounts.release(id, amount).await.unwrap();
                            assert_eq!(outcome.released, amount.min(held));
                            held -= outcome.released;
                        }
                    }
                }

                let reclaimed = accounts.reap(id).await.unwrap();
                assert_eq!(reclaimed.record.usage, held);
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        stop.cancel();
        let samples = sampler.await.unwrap();
        (accounts, samples)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_concurrent_scripts_conserve_units(scripts in scripts_strategy()) {
        let (accounts, samples) = run_scripts(scripts);

        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let snapshot = runtime.block_on(accounts.snapshot());

        prop_assert!(samples > 0);
        prop_assert!(snapshot.clients.is_empty());
        prop_assert_eq!(snapshot.available, CAPACITY);
    }

    #[test]
    fn prop_clamped_release_never_inflates_pool(
        grant in 1..=CAPACITY,
        release in 1..=(CAPACITY * 2),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let accounts = Accounts::new(CAPACITY, 1);
            let id = ClientId::new(1);
            accounts
                .admit(ClientRecord::new(id, "127.0.0.1:1".parse().unwrap()))
                .await
                .unwrap();

            accounts.request(id, grant).await.unwrap();
            let outcome = accounts.release(id, release).await.unwrap();

            assert_eq!(outcome.released, release.min(grant));
            assert!(outcome.available <= CAPACITY);
            assert!(accounts.snapshot().await.is_conserved());
        });
    }
}
