//! Fatal startup paths.

use std::sync::Arc;

use drover_core::ReplicaId;
use drover_harness::{HarnessError, RunCoordinator};
use drover_replica::{SimReplicaConfig, SimReplicaFactory};

use super::scenario;

#[tokio::test]
async fn factory_failure_aborts_the_run() {
    // Factory wired for two replicas, run asks for three.
    let factory = Arc::new(SimReplicaFactory::new(2, SimReplicaConfig::new(16, 0)));
    let coordinator =
        RunCoordinator::new(scenario(3, 300, 300), factory).with_progress(std::io::sink());

    let err = coordinator.run().await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        HarnessError::Startup { replica, .. } if replica == ReplicaId::new(0)
    ));
}

#[tokio::test]
async fn zero_replicas_is_a_configuration_error() {
    let factory = Arc::new(SimReplicaFactory::new(0, SimReplicaConfig::new(16, 0)));
    let coordinator =
        RunCoordinator::new(scenario(0, 0, 0), factory).with_progress(std::io::sink());

    let err = coordinator.run().await.unwrap_err();
    assert!(err.is_config());
}
