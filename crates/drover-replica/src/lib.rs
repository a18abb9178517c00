// Iron Lotus: Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # drover-replica
//!
//! In-process simulated ledger replicas for the Drover harness.
//!
//! Replicas gossip balance transfers over a shared [`Fabric`], seal them
//! into blocks on a fixed interval, and terminate on their own once every
//! expected transaction has been applied or the network goes quiet.
//!
//! ## Example
//!
//! ```rust,ignore
//! use drover_core::{ReplicaFactory, ReplicaId, RunConfig};
//! use drover_replica::SimReplicaFactory;
//!
//! let config = RunConfig::new(4);
//! let factory = SimReplicaFactory::from_run_config(&config);
//! let replica = factory.create(ReplicaId::new(0), 4).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fabric;
pub mod factory;
pub mod ledger;
pub mod node;

pub use fabric::{Fabric, Inbox};
pub use factory::SimReplicaFactory;
pub use ledger::Ledger;
pub use node::{SimReplica, SimReplicaConfig};
