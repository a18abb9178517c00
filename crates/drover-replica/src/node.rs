//! Simulated ledger replica.
//!
//! # Toyota Way: Jidoka (自働化)
//! A replica stops itself when its work is done or when it goes quiet,
//! and always releases its completion guard on the way out.

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use drover_core::{
    AccountId, AccountKeying, AccountSnapshot, AccountState, CompletionGuard, DebugState,
    LedgerSnapshot, Replica, ReplicaConfig, ReplicaError, ReplicaId, ReplicaStatus,
    ReportReceiver, Result, TrafficMetrics, TrafficSnapshot, Transaction,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::fabric::{Fabric, Inbox};
use crate::ledger::Ledger;

/// Unthrottled broadcasts yield to the scheduler this often.
const UNTHROTTLED_YIELD_EVERY: u64 = 256;

/// Settings shared by every replica of a run.
#[derive(Debug, Clone)]
pub struct SimReplicaConfig {
    /// Block production and liveness settings.
    pub replica: ReplicaConfig,
    /// Number of accounts in the ledger.
    pub accounts: u32,
    /// Account key representation.
    pub keying: AccountKeying,
    /// Transactions the whole pool is expected to issue.
    pub expected_transactions: u64,
    /// Base seed for transaction generation. Each replica offsets it by its id.
    pub seed: Option<u64>,
}

impl SimReplicaConfig {
    /// Creates a config with default replica settings.
    #[must_use]
    pub fn new(accounts: u32, expected_transactions: u64) -> Self {
        Self {
            replica: ReplicaConfig::default(),
            accounts,
            keying: AccountKeying::default(),
            expected_transactions,
            seed: None,
        }
    }

    /// Sets the replica settings.
    #[must_use]
    pub fn with_replica(mut self, replica: ReplicaConfig) -> Self {
        self.replica = replica;
        self
    }

    /// Sets the account keying.
    #[must_use]
    pub const fn with_keying(mut self, keying: AccountKeying) -> Self {
        self.keying = keying;
        self
    }

    /// Sets the generation seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the idle timeout.
    #[must_use]
    pub const fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.replica.idle_timeout = idle;
        self
    }
}

/// Why the execution loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Stopped,
    Exhausted,
    Idle,
}

struct Shared {
    id: ReplicaId,
    config: SimReplicaConfig,
    status: AtomicU8,
    cancel: CancellationToken,
    ledger: RwLock<Ledger>,
    traffic: TrafficMetrics,
    fabric: Fabric,
    pending: AtomicUsize,
    broadcast_started: AtomicBool,
    broadcast_done: AtomicBool,
    sequence: AtomicU64,
}

impl Shared {
    fn status(&self) -> ReplicaStatus {
        ReplicaStatus::from_u8(self.status.load(Ordering::Acquire))
            .unwrap_or(ReplicaStatus::Stopped)
    }

    fn transition(&self, from: ReplicaStatus, to: ReplicaStatus) -> bool {
        self.status
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// In-process replica that gossips transfers over a [`Fabric`] and seals
/// them into blocks on a fixed interval.
pub struct SimReplica {
    shared: Arc<Shared>,
    inbox: Mutex<Option<Inbox>>,
    report_tx: Mutex<Option<mpsc::Sender<bool>>>,
    report_rx: Mutex<Option<ReportReceiver>>,
}

impl std::fmt::Debug for SimReplica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimReplica")
            .field("id", &self.shared.id)
            .field("status", &self.shared.status())
            .finish_non_exhaustive()
    }
}

impl SimReplica {
    /// Creates a replica attached to `fabric` through `inbox`.
    #[must_use]
    pub fn new(id: ReplicaId, config: SimReplicaConfig, fabric: Fabric, inbox: Inbox) -> Self {
        let (report_tx, report_rx) = mpsc::channel(config.replica.report_capacity.max(1));
        let ledger = Ledger::new(config.accounts, config.keying, config.replica.initial_balance);

        Self {
            shared: Arc::new(Shared {
                id,
                config,
                status: AtomicU8::new(ReplicaStatus::Created.as_u8()),
                cancel: CancellationToken::new(),
                ledger: RwLock::new(ledger),
                traffic: TrafficMetrics::new(),
                fabric,
                pending: AtomicUsize::new(0),
                broadcast_started: AtomicBool::new(false),
                broadcast_done: AtomicBool::new(false),
                sequence: AtomicU64::new(0),
            }),
            inbox: Mutex::new(Some(inbox)),
            report_tx: Mutex::new(Some(report_tx)),
            report_rx: Mutex::new(Some(report_rx)),
        }
    }

    /// Returns the replica's traffic counters.
    #[must_use]
    pub fn metrics(&self) -> &TrafficMetrics {
        &self.shared.traffic
    }
}

#[async_trait]
impl Replica for SimReplica {
    fn id(&self) -> ReplicaId {
        self.shared.id
    }

    async fn start(&self, guard: CompletionGuard) -> Result<()> {
        let id = self.shared.id;
        match self.shared.status() {
            ReplicaStatus::Created => {}
            ReplicaStatus::Stopped => {
                tracing::debug!(replica = %id, "start after stop, releasing guard");
                self.report_tx.lock().take();
                guard.complete();
                return Ok(());
            }
            status => {
                return Err(ReplicaError::start(id, format!("already {status}")));
            }
        }

        let (Some(inbox), Some(report_tx)) = (self.inbox.lock().take(), self.report_tx.lock().take())
        else {
            if self.shared.status() == ReplicaStatus::Stopped {
                // A concurrent stop released the channels first.
                guard.complete();
                return Ok(());
            }
            return Err(ReplicaError::start(id, "channels already taken"));
        };

        if !self
            .shared
            .transition(ReplicaStatus::Created, ReplicaStatus::Running)
        {
            // Stopped between the check and the transition.
            drop(report_tx);
            guard.complete();
            return Ok(());
        }

        tracing::debug!(replica = %id, "replica started");
        tokio::spawn(execute(Arc::clone(&self.shared), inbox, report_tx, guard));
        Ok(())
    }

    fn broadcast(&self, rate: u32, count: u64) -> Result<()> {
        let status = self.shared.status();
        if !status.is_running() {
            return Err(ReplicaError::broadcast(format!(
                "replica {} is {status}",
                self.shared.id
            )));
        }
        if self.shared.broadcast_started.swap(true, Ordering::AcqRel) {
            return Err(ReplicaError::state(format!(
                "replica {} already broadcasting",
                self.shared.id
            )));
        }

        tokio::spawn(issue(Arc::clone(&self.shared), rate, count));
        Ok(())
    }

    fn stop(&self) -> bool {
        let stopped = if self
            .shared
            .transition(ReplicaStatus::Running, ReplicaStatus::Stopped)
        {
            true
        } else if self
            .shared
            .transition(ReplicaStatus::Created, ReplicaStatus::Stopped)
        {
            // Never started: close the liveness channel and the inbox here.
            drop(self.report_tx.lock().take());
            drop(self.inbox.lock().take());
            true
        } else {
            false
        };
        if stopped {
            self.shared.cancel.cancel();
            tracing::debug!(replica = %self.shared.id, "replica stop requested");
        }
        stopped
    }

    fn status(&self) -> ReplicaStatus {
        self.shared.status()
    }

    fn take_report(&self) -> Option<ReportReceiver> {
        self.report_rx.lock().take()
    }

    fn height(&self) -> u64 {
        self.shared.ledger.read().height()
    }

    fn tip_transactions(&self) -> Option<usize> {
        self.shared
            .ledger
            .read()
            .tip()
            .map(|block| block.transactions.len())
    }

    fn ledger(&self) -> LedgerSnapshot {
        self.shared.ledger.read().blocks()
    }

    fn account(&self, id: &AccountId) -> Option<AccountState> {
        self.shared.ledger.read().account(id)
    }

    fn accounts(&self) -> AccountSnapshot {
        self.shared.ledger.read().accounts()
    }

    fn traffic(&self) -> Option<TrafficSnapshot> {
        Some(self.shared.traffic.snapshot())
    }

    fn debug_state(&self) -> DebugState {
        let (height, applied) = {
            let ledger = self.shared.ledger.read();
            (ledger.height(), ledger.applied())
        };

        DebugState {
            id: self.shared.id,
            status: self.shared.status(),
            height,
            pending: self.shared.pending.load(Ordering::Relaxed),
            applied,
            traffic: self.traffic(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Execution
// ═══════════════════════════════════════════════════════════════════════════

async fn execute(
    shared: Arc<Shared>,
    mut inbox: Inbox,
    report_tx: mpsc::Sender<bool>,
    guard: CompletionGuard,
) {
    let config = &shared.config.replica;
    let mut mempool: VecDeque<Transaction> = VecDeque::new();
    let mut ticker = tokio::time::interval(config.block_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_activity = Instant::now();
    let mut inbox_open = true;

    let exit = loop {
        tokio::select! {
            () = shared.cancel.cancelled() => break Exit::Stopped,

            received = inbox.recv(), if inbox_open => match received {
                Some(tx) => {
                    shared.traffic.record_in(Transaction::WIRE_SIZE);
                    mempool.push_back(tx);
                    shared.pending.store(mempool.len(), Ordering::Relaxed);
                    last_activity = Instant::now();
                }
                None => inbox_open = false,
            },

            _ = ticker.tick() => {
                if !mempool.is_empty() {
                    let take = mempool.len().min(config.max_block_transactions);
                    let batch: Vec<_> = mempool.drain(..take).collect();
                    let (height, applied) = {
                        let mut ledger = shared.ledger.write();
                        ledger.append(batch);
                        (ledger.height(), ledger.applied())
                    };
                    shared.pending.store(mempool.len(), Ordering::Relaxed);
                    shared.traffic.record_block();
                    // A full channel means the monitor already has a render queued.
                    let _ = report_tx.try_send(true);
                    tracing::trace!(replica = %shared.id, height, applied, "block sealed");

                    let expected = shared.config.expected_transactions;
                    if expected > 0 && applied >= expected {
                        break Exit::Exhausted;
                    }
                }

                if mempool.is_empty()
                    && shared.broadcast_done.load(Ordering::Acquire)
                    && last_activity.elapsed() >= config.idle_timeout
                {
                    break Exit::Idle;
                }
            }
        }
    };

    if exit != Exit::Stopped
        && shared.transition(ReplicaStatus::Running, ReplicaStatus::Finished)
    {
        shared.cancel.cancel();
    }

    drop(inbox);
    drop(report_tx);
    tracing::debug!(
        replica = %shared.id,
        exit = ?exit,
        height = shared.ledger.read().height(),
        "replica terminated"
    );
    guard.complete();
}

// ═══════════════════════════════════════════════════════════════════════════
// Broadcast
// ═══════════════════════════════════════════════════════════════════════════

fn limiter_for(rate: u32) -> Option<DefaultDirectRateLimiter> {
    let per_second = NonZeroU32::new(rate)?;
    let burst = NonZeroU32::new((rate / 10).max(1)).unwrap_or(NonZeroU32::MIN);
    Some(RateLimiter::direct(
        Quota::per_second(per_second).allow_burst(burst),
    ))
}

fn rng_for(seed: Option<u64>, id: ReplicaId) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id.index() as u64)),
        None => StdRng::from_entropy(),
    }
}

fn generate(shared: &Shared, rng: &mut StdRng) -> Transaction {
    let accounts = shared.config.accounts.max(2);
    let from = rng.gen_range(0..accounts);
    let mut to = rng.gen_range(0..accounts - 1);
    if to >= from {
        to += 1;
    }

    Transaction {
        origin: shared.id,
        sequence: shared.sequence.fetch_add(1, Ordering::Relaxed),
        from,
        to,
        amount: rng.gen_range(1..=shared.config.replica.max_transfer.max(1)),
    }
}

async fn issue(shared: Arc<Shared>, rate: u32, count: u64) {
    let limiter = limiter_for(rate);
    let mut rng = rng_for(shared.config.seed, shared.id);
    let mut issued = 0u64;

    while issued < count {
        if let Some(limiter) = &limiter {
            tokio::select! {
                () = shared.cancel.cancelled() => break,
                () = limiter.until_ready() => {}
            }
        } else if shared.cancel.is_cancelled() {
            break;
        } else if issued % UNTHROTTLED_YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }

        let tx = generate(&shared, &mut rng);
        let delivered = shared.fabric.publish(&tx);
        shared.traffic.record_out(Transaction::WIRE_SIZE, delivered);
        issued += 1;
    }

    shared.broadcast_done.store(true, Ordering::Release);
    tracing::debug!(replica = %shared.id, issued, requested = count, "broadcast finished");
}
