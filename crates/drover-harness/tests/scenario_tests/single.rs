//! One replica, no crashes.

use drover_core::ReplicaId;

use super::{run, scenario};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_replica_measures_its_own_span() {
    let outcome = run(scenario(1, 100, 100)).await.unwrap();

    let monitor = outcome.monitor.expect("monitor summary");
    assert_eq!(monitor.sources, 1);
    assert_eq!(monitor.closed, vec![ReplicaId::new(0)]);

    let throughput = &outcome.report.throughput;
    assert_eq!(throughput.reference, ReplicaId::new(0));
    assert_eq!(throughput.confirmed, 100);
    assert!(throughput.span_secs > 0.0);
    let tps = throughput.tps.expect("throughput");
    assert!((tps - 100.0 / throughput.span_secs).abs() < 1e-6);
    assert!(throughput.traffic_in_per_sec.is_some());
    assert_eq!(outcome.report.rows.len(), 1);
}
