// Iron Lotus: Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # drover-core
//!
//! Core primitives for the Drover replicated-ledger simulation harness.
//!
//! This crate provides the boundary between the harness and the ledger
//! engine it drives:
//!
//! - [`Replica`] trait for the replica lifecycle and read-only accessors
//! - [`ReplicaFactory`] for creating the pool
//! - [`CompletionBarrier`] for detecting when every replica has terminated
//! - [`RunConfig`] for run configuration
//! - [`TrafficMetrics`] for per-replica traffic counters
//!
//! ## Iron Lotus Framework
//!
//! - **Jidoka**: Explicit error handling, no panics
//! - **Poka-Yoke**: Configuration validated before any replica exists
//! - **Genchi Genbutsu**: Snapshots over shared mutable state

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod barrier;
pub mod config;
pub mod error;
pub mod metrics;
pub mod replica;
pub mod types;

pub use barrier::{CompletionBarrier, CompletionGuard};
pub use config::{AccountSampling, ReplicaConfig, RunConfig};
pub use error::{ReplicaError, Result};
pub use metrics::TrafficMetrics;
pub use replica::{Replica, ReplicaFactory, ReplicaPool, ReportReceiver};
pub use types::{
    AccountId, AccountKeying, AccountSnapshot, AccountState, Block, DebugState, LedgerSnapshot,
    ReplicaId, ReplicaStatus, RunId, TrafficSnapshot, Transaction,
};
