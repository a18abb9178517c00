//! Core types shared between the harness and replica implementations.
//!
//! Replicas are addressed by position in the pool; a run is addressed by
//! a UUID so that log lines from concurrent runs stay separable.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for one harness run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(uuid::Uuid);

impl RunId {
    /// Creates a new random run ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a replica in the pool, in `[0, N)`.
///
/// Index 0 is the canonical reporting replica.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ReplicaId(usize);

impl ReplicaId {
    /// The canonical reporting replica.
    pub const REPORTER: Self = Self(0);

    /// Creates a replica ID from a pool index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the pool index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }

    /// Returns true for the canonical reporting replica.
    #[must_use]
    pub const fn is_reporter(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Replica lifecycle state.
///
/// ```text
/// Created → Running → Finished   (budget exhausted / quiescent)
///    │         └────→ Stopped    (external stop)
///    └──────────────→ Stopped    (stopped before start)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaStatus {
    /// Created but not started.
    Created,
    /// Executing and producing blocks.
    Running,
    /// Stopped by an external `stop` call.
    Stopped,
    /// Terminated on its own.
    Finished,
}

impl ReplicaStatus {
    /// Returns true if the replica will never produce another block.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Finished)
    }

    /// Returns true if the replica is currently running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Encodes the status for storage in an atomic.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Running => 1,
            Self::Stopped => 2,
            Self::Finished => 3,
        }
    }

    /// Decodes a status previously produced by [`ReplicaStatus::as_u8`].
    #[must_use]
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Created),
            1 => Some(Self::Running),
            2 => Some(Self::Stopped),
            3 => Some(Self::Finished),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReplicaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// Account identifier as stored in a replica's account state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccountId {
    /// Numerically keyed account.
    Index(u32),
    /// String keyed account.
    Name(String),
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index(n) => write!(f, "{n}"),
            Self::Name(s) => f.write_str(s),
        }
    }
}

/// How account indices map to [`AccountId`] keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKeying {
    /// Accounts keyed by their numeric index.
    #[default]
    Numeric,
    /// Accounts keyed by the decimal string of their index.
    Named,
}

impl AccountKeying {
    /// Returns the key for the account at `index`.
    #[must_use]
    pub fn key(self, index: u32) -> AccountId {
        match self {
            Self::Numeric => AccountId::Index(index),
            Self::Named => AccountId::Name(index.to_string()),
        }
    }
}

impl std::str::FromStr for AccountKeying {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "numeric" => Ok(Self::Numeric),
            "named" => Ok(Self::Named),
            other => Err(format!("unknown account keying '{other}' (numeric|named)")),
        }
    }
}

/// Per-account state held by a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    /// Current balance. Signed so that application order never matters.
    pub balance: i64,
    /// Number of transfers sent from this account.
    pub nonce: u64,
}

impl AccountState {
    /// Creates an account with the given opening balance.
    #[must_use]
    pub const fn with_balance(balance: i64) -> Self {
        Self { balance, nonce: 0 }
    }
}

/// A balance transfer between two accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Replica that issued the transaction.
    pub origin: ReplicaId,
    /// Per-origin sequence number.
    pub sequence: u64,
    /// Sending account index.
    pub from: u32,
    /// Receiving account index.
    pub to: u32,
    /// Amount transferred.
    pub amount: u64,
}

impl Transaction {
    /// Bytes accounted per transaction for traffic counters.
    pub const WIRE_SIZE: u64 = 8 + 8 + 4 + 4 + 8;
}

/// A block in a replica's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// 1-based height.
    pub height: u64,
    /// Production time. Non-decreasing along a ledger.
    pub timestamp: DateTime<Utc>,
    /// Confirmed transactions, in application order.
    pub transactions: Vec<Transaction>,
}

/// Read-only copy of a replica's ledger.
pub type LedgerSnapshot = Vec<Arc<Block>>;

/// Read-only copy of a replica's account state.
pub type AccountSnapshot = HashMap<AccountId, AccountState>;

/// Traffic counters exposed by replicas that track them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSnapshot {
    /// Bytes received.
    pub bytes_in: u64,
    /// Bytes sent.
    pub bytes_out: u64,
}

/// Point-in-time debug view of a replica, printed on diagnostic signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugState {
    /// Replica position.
    pub id: ReplicaId,
    /// Lifecycle state.
    pub status: ReplicaStatus,
    /// Ledger height.
    pub height: u64,
    /// Transactions received but not yet in a block.
    pub pending: usize,
    /// Transactions applied to account state.
    pub applied: u64,
    /// Traffic counters, if tracked.
    pub traffic: Option<TrafficSnapshot>,
}

impl std::fmt::Display for DebugState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "node {} status={} height={} pending={} applied={}",
            self.id, self.status, self.height, self.pending, self.applied
        )?;
        if let Some(traffic) = self.traffic {
            write!(f, " in={}B out={}B", traffic.bytes_in, traffic.bytes_out)?;
        }
        Ok(())
    }
}
