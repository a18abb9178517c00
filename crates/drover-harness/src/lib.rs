// Iron Lotus: Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # drover-harness
//!
//! Orchestration and verification for replicated ledger pools.
//!
//! This crate provides:
//! - **Workload scheduling**: even budget and rate split, optional staggered starts
//! - **Progress monitoring**: fan-in over every replica's liveness channel
//! - **Crash injection**: randomized stops that never touch protected replicas
//! - **Run coordination**: a completion barrier over the whole pool
//! - **Consistency verification**: sampled balances and reference throughput
//!
//! ## Iron Lotus Framework
//!
//! - **Built-in Quality** (品質の作り込み): Only startup failures are fatal
//! - **Jidoka**: Replicas stop themselves; the harness only observes
//! - **Genchi Genbutsu**: Verification reads real replica state
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use drover_core::RunConfig;
//! use drover_harness::RunCoordinator;
//! use drover_replica::SimReplicaFactory;
//!
//! let config = RunConfig::new(3).with_transactions(300).with_rate(300);
//! let factory = Arc::new(SimReplicaFactory::from_run_config(&config));
//! let outcome = RunCoordinator::new(config, factory).run().await?;
//! println!("{}", outcome.report);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod chaos;
pub mod coordinator;
pub mod error;
pub mod monitor;
pub mod scheduler;
pub mod signals;
pub mod verifier;

#[cfg(test)]
pub mod tests;

pub use chaos::{CrashEvent, CrashInjector, CrashPlan, CrashReport};
pub use coordinator::{DEFAULT_MONITOR_GRACE, RunCoordinator, RunOutcome};
pub use error::{HarnessError, Result};
pub use monitor::{MonitorSummary, ProgressMonitor, render_grid, render_header};
pub use scheduler::{ScheduleReport, WorkloadPlan, WorkloadScheduler};
pub use signals::{SignalWatcher, dump_state};
pub use verifier::{ConsistencyReport, ConsistencyVerifier, ReplicaRow, Throughput};
