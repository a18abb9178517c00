//! Five replicas, two crashes.

use std::collections::HashSet;
use std::time::Duration;

use drover_core::{ReplicaId, ReplicaStatus};

use super::{assert_ledger_monotonic, run, scenario};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_crashes_before_completion() {
    let config = scenario(5, 500, 500).with_crashes(2).with_crash_timing(
        Duration::ZERO,
        Duration::from_millis(50),
        Duration::from_millis(150),
    );
    let outcome = run(config).await.unwrap();

    let crashes = &outcome.crashes;
    assert_eq!(crashes.injected.len(), 2);
    assert!(!crashes.exhausted);
    let targets: HashSet<_> = crashes.targets().into_iter().collect();
    assert_eq!(targets.len(), 2);
    assert!(!targets.contains(&ReplicaId::new(0)));

    let report = &outcome.report;
    assert_eq!(report.rows.len(), 5);
    for row in &report.rows {
        if targets.contains(&row.id) {
            assert_eq!(row.status, ReplicaStatus::Stopped);
        } else {
            assert_eq!(row.status, ReplicaStatus::Finished);
        }
    }

    // Crashed replicas never issued their full share.
    assert!(report.throughput.confirmed < 500);
    assert_eq!(report.finished.len(), 3);
    assert!(report.is_consistent());
    assert_ledger_monotonic(&outcome);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crash_count_above_eligible_is_rejected() {
    let err = run(scenario(3, 300, 300).with_crashes(3)).await.unwrap_err();
    assert!(err.is_config());
}
