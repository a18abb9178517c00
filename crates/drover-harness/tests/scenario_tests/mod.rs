//! End-to-end scenarios over the in-process simulated replica pool.

// Allow test-specific patterns that are denied in production code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod baseline;
mod crashes;
mod single;
mod startup;

use std::sync::Arc;
use std::time::Duration;

use drover_core::{ReplicaConfig, RunConfig};
use drover_harness::{Result, RunCoordinator, RunOutcome};
use drover_replica::SimReplicaFactory;

/// Replica settings tuned for sub-second scenarios.
pub fn fast_replica() -> ReplicaConfig {
    ReplicaConfig {
        block_interval: Duration::from_millis(20),
        idle_timeout: Duration::from_millis(500),
        ..ReplicaConfig::default()
    }
}

/// Scenario configuration with a fixed seed.
pub fn scenario(replicas: usize, transactions: u64, rate: u32) -> RunConfig {
    RunConfig::new(replicas)
        .with_transactions(transactions)
        .with_rate(rate)
        .with_seed(0x5eed)
        .with_replica(fast_replica())
}

/// Runs `config` against a simulated pool, bounded by a generous timeout.
pub async fn run(config: RunConfig) -> Result<RunOutcome> {
    let factory = Arc::new(SimReplicaFactory::from_run_config(&config));
    let coordinator = RunCoordinator::new(config, factory).with_progress(std::io::sink());
    tokio::time::timeout(Duration::from_secs(30), coordinator.run())
        .await
        .expect("run did not complete within 30s")
}

/// Asserts block heights are contiguous and timestamps never decrease.
pub fn assert_ledger_monotonic(outcome: &RunOutcome) {
    for replica in outcome.pool.iter() {
        let ledger = replica.ledger();
        for (position, block) in ledger.iter().enumerate() {
            assert_eq!(block.height, position as u64 + 1);
        }
        assert!(
            ledger.windows(2).all(|w| w[0].timestamp <= w[1].timestamp),
            "timestamps decreased on replica {}",
            replica.id()
        );
    }
}
