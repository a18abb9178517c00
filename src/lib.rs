//! Drover: replicated-ledger simulation harness.
//!
//! Drives a fixed-size pool of ledger replicas under load, injects
//! randomized crashes, and verifies that the survivors converge.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use drover::prelude::*;
//!
//! # async fn run() -> drover::harness::Result<()> {
//! let config = RunConfig::new(3).with_transactions(300).with_rate(300);
//! let factory = Arc::new(SimReplicaFactory::from_run_config(&config));
//! let outcome = RunCoordinator::new(config, factory).run().await?;
//! println!("{}", outcome.report);
//! # Ok(())
//! # }
//! ```

pub use drover_core as core;
pub use drover_harness as harness;
pub use drover_replica as replica;

/// Prelude module for common imports.
pub mod prelude {
    pub use drover_core::{
        AccountId, AccountKeying, AccountSampling, CompletionBarrier, Replica, ReplicaConfig,
        ReplicaFactory, ReplicaId, ReplicaPool, ReplicaStatus, RunConfig,
    };
    pub use drover_harness::{
        ConsistencyReport, ConsistencyVerifier, CrashInjector, CrashPlan, HarnessError,
        ProgressMonitor, RunCoordinator, RunOutcome, WorkloadPlan, WorkloadScheduler,
    };
    pub use drover_replica::{SimReplica, SimReplicaConfig, SimReplicaFactory};
}
