//! Factory wiring a pool of [`SimReplica`]s onto one [`Fabric`].

use std::sync::Arc;

use async_trait::async_trait;
use drover_core::{Replica, ReplicaError, ReplicaFactory, ReplicaId, Result, RunConfig};
use parking_lot::Mutex;

use crate::fabric::{Fabric, Inbox};
use crate::node::{SimReplica, SimReplicaConfig};

/// Creates simulated replicas sharing one fabric.
///
/// Each position can be created once.
#[derive(Debug)]
pub struct SimReplicaFactory {
    config: SimReplicaConfig,
    fabric: Fabric,
    inboxes: Mutex<Vec<Option<Inbox>>>,
}

impl SimReplicaFactory {
    /// Creates a factory for `replicas` replicas.
    #[must_use]
    pub fn new(replicas: usize, config: SimReplicaConfig) -> Self {
        let (fabric, inboxes) = Fabric::new(replicas);
        Self {
            config,
            fabric,
            inboxes: Mutex::new(inboxes.into_iter().map(Some).collect()),
        }
    }

    /// Creates a factory matching a run configuration.
    ///
    /// The idle timeout is extended by the start stagger, since the longest
    /// quiet gap a replica can observe is one stagger step.
    #[must_use]
    pub fn from_run_config(run: &RunConfig) -> Self {
        let mut config = SimReplicaConfig::new(run.accounts, run.expected_network_transactions())
            .with_replica(run.replica.clone())
            .with_keying(run.keying);
        config.replica.idle_timeout += run.stagger;
        if let Some(seed) = run.seed {
            config = config.with_seed(seed);
        }
        Self::new(run.replicas, config)
    }

    /// Returns the shared replica settings.
    #[must_use]
    pub const fn config(&self) -> &SimReplicaConfig {
        &self.config
    }

    /// Returns the fabric the replicas gossip over.
    #[must_use]
    pub const fn fabric(&self) -> &Fabric {
        &self.fabric
    }
}

#[async_trait]
impl ReplicaFactory for SimReplicaFactory {
    async fn create(&self, id: ReplicaId, total: usize) -> Result<Arc<dyn Replica>> {
        if total != self.fabric.len() {
            return Err(ReplicaError::config(format!(
                "factory built for {} replicas, asked for {total}",
                self.fabric.len()
            )));
        }

        let inbox = {
            let mut inboxes = self.inboxes.lock();
            let slot = inboxes.get_mut(id.index()).ok_or_else(|| {
                ReplicaError::config(format!("replica {id} out of range 0..{total}"))
            })?;
            slot.take()
                .ok_or_else(|| ReplicaError::config(format!("replica {id} already created")))?
        };

        tracing::trace!(replica = %id, total, "creating simulated replica");
        Ok(Arc::new(SimReplica::new(
            id,
            self.config.clone(),
            self.fabric.clone(),
            inbox,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::ReplicaStatus;
    use std::time::Duration;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_create_each_position_once() {
        let factory = SimReplicaFactory::new(3, SimReplicaConfig::new(8, 0));
        for i in 0..3 {
            let replica = assert_ok!(factory.create(ReplicaId::new(i), 3).await);
            assert_eq!(replica.id(), ReplicaId::new(i));
            assert_eq!(replica.status(), ReplicaStatus::Created);
        }

        let err = factory
            .create(ReplicaId::new(1), 3)
            .await
            .err()
            .expect("second create must fail");
        assert!(err.is_fatal());
        assert!(err.to_string().contains("already created"));
    }

    #[tokio::test]
    async fn test_out_of_range_rejected() {
        let factory = SimReplicaFactory::new(2, SimReplicaConfig::new(8, 0));
        let err = factory
            .create(ReplicaId::new(2), 2)
            .await
            .err()
            .expect("out-of-range create must fail");
        assert!(matches!(err, ReplicaError::Config(_)));
    }

    #[tokio::test]
    async fn test_pool_size_mismatch_rejected() {
        let factory = SimReplicaFactory::new(2, SimReplicaConfig::new(8, 0));
        assert!(factory.create(ReplicaId::new(0), 5).await.is_err());
    }

    #[test]
    fn test_from_run_config() {
        let run = RunConfig::new(4)
            .with_transactions(1_002)
            .with_stagger(Duration::from_secs(1))
            .with_seed(9);
        let factory = SimReplicaFactory::from_run_config(&run);

        assert_eq!(factory.fabric().len(), 4);
        assert_eq!(factory.config().expected_transactions, 1_000);
        assert_eq!(factory.config().seed, Some(9));
        assert_eq!(
            factory.config().replica.idle_timeout,
            run.replica.idle_timeout + Duration::from_secs(1)
        );
    }
}
