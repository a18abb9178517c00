//! Workload scheduling across the replica pool.
//!
//! # Toyota Way: Heijunka (平準化)
//! Level loading: the aggregate budget and rate are split evenly across
//! replicas, and starts can be ramped one replica at a time.

use std::time::{Duration, Instant};

use drover_core::{CompletionGuard, ReplicaPool, RunConfig};
use serde::Serialize;

use crate::error::{HarnessError, Result};

/// Per-replica share of the run's workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadPlan {
    /// Transactions per second requested from each replica.
    pub rate: u32,
    /// Transactions requested from each replica.
    pub transactions: u64,
    /// Delay between consecutive replica starts. Zero starts all together.
    pub stagger: Duration,
}

impl WorkloadPlan {
    /// Splits the configured budget and rate evenly. Remainders are dropped.
    #[must_use]
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            rate: config.per_replica_rate(),
            transactions: config.per_replica_transactions(),
            stagger: config.stagger,
        }
    }

    /// Returns true if replicas start one after another.
    #[must_use]
    pub fn is_staggered(&self) -> bool {
        !self.stagger.is_zero()
    }
}

/// What the scheduler did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
    /// Replicas started.
    pub started: usize,
    /// Broadcast requests accepted.
    pub broadcasts: usize,
    /// Replicas whose broadcast request was rejected without being fatal,
    /// typically because they were stopped in between.
    pub rejected: Vec<usize>,
}

/// Starts every replica and issues its broadcast request.
pub struct WorkloadScheduler {
    plan: WorkloadPlan,
    pool: ReplicaPool,
    guards: Vec<CompletionGuard>,
}

impl WorkloadScheduler {
    /// Creates a scheduler. `guards[i]` is handed to replica `i` on start.
    #[must_use]
    pub fn new(plan: WorkloadPlan, pool: ReplicaPool, guards: Vec<CompletionGuard>) -> Self {
        Self { plan, pool, guards }
    }

    /// Returns the workload plan.
    #[must_use]
    pub const fn plan(&self) -> &WorkloadPlan {
        &self.plan
    }

    /// Runs the schedule.
    ///
    /// With a stagger, replica `i` starts only after replica `i - 1` has
    /// been running for the stagger interval.
    ///
    /// # Errors
    /// Returns an error if a replica fails to start or rejects its
    /// broadcast with a fatal error. There are no retries; guards not yet
    /// handed out are released on return.
    pub async fn run(self) -> Result<ScheduleReport> {
        let Self { plan, pool, guards } = self;

        if guards.len() != pool.len() {
            return Err(HarnessError::config(format!(
                "{} guards for {} replicas",
                guards.len(),
                pool.len()
            )));
        }

        tracing::info!(
            replicas = pool.len(),
            rate = plan.rate,
            transactions = plan.transactions,
            stagger = ?plan.stagger,
            "scheduling workload"
        );

        let start_time = Instant::now();
        let mut report = ScheduleReport::default();

        for (position, (replica, guard)) in pool.iter().zip(guards).enumerate() {
            if position > 0 && plan.is_staggered() {
                tokio::time::sleep(plan.stagger).await;
            }

            let id = replica.id();
            replica
                .start(guard)
                .await
                .map_err(|source| HarnessError::startup(id, source))?;
            report.started += 1;

            match replica.broadcast(plan.rate, plan.transactions) {
                Ok(()) => report.broadcasts += 1,
                Err(source) if source.is_fatal() => {
                    return Err(HarnessError::startup(id, source));
                }
                Err(err) => {
                    tracing::warn!(replica = %id, error = %err, "broadcast rejected");
                    report.rejected.push(id.index());
                }
            }

            tracing::debug!(replica = %id, "replica scheduled");
        }

        tracing::info!(
            started = report.started,
            broadcasts = report.broadcasts,
            elapsed = ?start_time.elapsed(),
            "workload scheduled"
        );

        Ok(report)
    }
}
