//! Replica abstraction consumed by the harness.
//!
//! # Toyota Way: Standardized Work (標準作業)
//! Every replica follows the same lifecycle contract, so the harness can
//! drive any ledger engine without knowing its internals.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::barrier::CompletionGuard;
use crate::error::Result;
use crate::types::{
    AccountId, AccountSnapshot, AccountState, DebugState, LedgerSnapshot, ReplicaId,
    ReplicaStatus, TrafficSnapshot,
};

/// Receiving end of a replica's liveness channel.
///
/// `true` means "new block produced". The channel closes when the replica
/// terminates.
pub type ReportReceiver = mpsc::Receiver<bool>;

/// Arena of replica handles indexed by position.
pub type ReplicaPool = Arc<[Arc<dyn Replica>]>;

/// One simulated ledger node.
///
/// # Implementation Guidelines
///
/// 1. **start**: Spawn the replica's execution and hold the completion
///    guard until it terminates, for whatever reason.
///
/// 2. **broadcast**: Begin issuing transactions in the background. Must
///    not block the caller.
///
/// 3. **stop**: Idempotent and callable at any time, from any task. The
///    first call terminates the replica; later calls do nothing. In-flight
///    broadcasts are abandoned, not drained.
///
/// 4. **accessors**: Return snapshots; never hold locks across calls.
///
/// # Example
///
/// ```rust,ignore
/// use drover_core::{CompletionGuard, Replica, ReplicaId};
///
/// let replica = factory.create(ReplicaId::new(0), 3).await?;
/// replica.start(guard).await?;
/// replica.broadcast(100, 1_000)?;
/// assert!(replica.is_running());
/// replica.stop();
/// ```
#[async_trait]
pub trait Replica: Send + Sync + 'static {
    /// Returns the replica's position in the pool.
    fn id(&self) -> ReplicaId;

    /// Starts the replica's execution.
    ///
    /// The guard must be completed (or dropped) exactly when the replica
    /// terminates. Starting a replica that was stopped before it ran
    /// releases the guard immediately.
    ///
    /// # Poka-Yoke
    /// Fail fast here rather than mid-run.
    ///
    /// # Errors
    /// Returns an error if the replica cannot start.
    async fn start(&self, guard: CompletionGuard) -> Result<()>;

    /// Requests `count` transactions issued at `rate` per second.
    ///
    /// A rate of zero means unthrottled.
    ///
    /// # Errors
    /// Returns an error if the replica cannot accept the request.
    fn broadcast(&self, rate: u32, count: u64) -> Result<()>;

    /// Stops the replica.
    ///
    /// Returns true if this call performed the transition, false if the
    /// replica had already terminated.
    fn stop(&self) -> bool;

    /// Returns the current lifecycle state.
    fn status(&self) -> ReplicaStatus;

    /// Returns true if the replica is currently running.
    fn is_running(&self) -> bool {
        self.status().is_running()
    }

    /// Hands out the liveness channel. Returns `None` after the first call.
    fn take_report(&self) -> Option<ReportReceiver>;

    /// Returns the current ledger height.
    fn height(&self) -> u64;

    /// Returns the transaction count of the most recent block.
    fn tip_transactions(&self) -> Option<usize>;

    /// Returns a snapshot of the ledger.
    fn ledger(&self) -> LedgerSnapshot;

    /// Returns the state of one account.
    fn account(&self, id: &AccountId) -> Option<AccountState>;

    /// Returns a snapshot of all account state.
    fn accounts(&self) -> AccountSnapshot;

    /// Returns traffic counters, if the replica tracks them.
    fn traffic(&self) -> Option<TrafficSnapshot> {
        None
    }

    /// Returns a debug view of the replica.
    fn debug_state(&self) -> DebugState;
}

/// Creates replicas for a run.
#[async_trait]
pub trait ReplicaFactory: Send + Sync {
    /// Creates the replica at position `id` of a pool of `total` replicas.
    ///
    /// # Errors
    /// Returns an error if the replica cannot be created.
    async fn create(&self, id: ReplicaId, total: usize) -> Result<Arc<dyn Replica>>;
}
