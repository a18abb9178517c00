//! Three replicas, no crashes.

use drover_core::ReplicaStatus;

use super::{assert_ledger_monotonic, run, scenario};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_replicas_complete_without_crashes() {
    let outcome = run(scenario(3, 300, 300)).await.unwrap();

    assert_eq!(outcome.schedule.started, 3);
    assert_eq!(outcome.schedule.broadcasts, 3);
    assert!(outcome.crashes.injected.is_empty());

    let report = &outcome.report;
    assert_eq!(report.rows.len(), 3);
    assert_eq!(report.accounts.len(), 3);
    for row in &report.rows {
        assert!(row.height > 0, "replica {} produced no blocks", row.id);
        assert_eq!(row.status, ReplicaStatus::Finished);
        assert_eq!(row.balances.len(), 3);
        assert!(row.balances.iter().all(|b| b.is_some_and(|b| b >= 0)));
    }

    assert_eq!(report.throughput.confirmed, 300);
    assert!(report.throughput.tps.is_some());
    assert!(report.is_consistent());
    assert_eq!(report.finished.len(), 3);
    assert_ledger_monotonic(&outcome);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn monitor_drains_every_source() {
    let outcome = run(scenario(3, 300, 300)).await.unwrap();
    let monitor = outcome.monitor.expect("monitor summary");

    assert_eq!(monitor.sources, 3);
    assert_eq!(monitor.closed.len(), 3);
    assert!(monitor.renders > 0);
    assert!(monitor.active.windows(2).all(|w| w[1] <= w[0]));
    assert_eq!(monitor.active.last(), Some(&0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn staggered_start_still_converges() {
    let config = scenario(3, 150, 300).with_stagger(std::time::Duration::from_millis(200));
    let outcome = run(config).await.unwrap();

    assert!(outcome.report.rows.iter().all(|row| row.height > 0));
    assert_eq!(outcome.report.throughput.confirmed, 150);
    assert!(outcome.report.is_consistent());
}
