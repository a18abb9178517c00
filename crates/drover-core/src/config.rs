//! Run configuration.
//!
//! Per Iron Lotus Framework: Configuration is validated at load time (Poka-Yoke),
//! with sensible defaults and clear error messages. A [`RunConfig`] is
//! immutable for the duration of a run.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ReplicaError, Result};
use crate::types::{AccountKeying, ReplicaId};

/// How the verifier chooses which accounts to display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountSampling {
    /// Uniform draws over the account space, duplicates allowed.
    #[default]
    Random,
    /// The first `N` accounts.
    Leading,
}

impl std::str::FromStr for AccountSampling {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "random" => Ok(Self::Random),
            "leading" => Ok(Self::Leading),
            other => Err(format!("unknown account sampling '{other}' (random|leading)")),
        }
    }
}

/// Configuration for a single harness run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of replicas `N`.
    pub replicas: usize,

    /// Total transaction budget `T`, split evenly across replicas.
    pub total_transactions: u64,

    /// Target aggregate rate `R` in transactions per second.
    pub target_rate: u32,

    /// Number of replicas the crash injector stops, `C`.
    pub crashes: usize,

    /// Delay between consecutive replica starts. Zero starts all together.
    #[serde(with = "humantime_duration")]
    pub stagger: Duration,

    /// Delay before the crash schedule begins.
    #[serde(with = "humantime_duration")]
    pub crash_warmup: Duration,

    /// Lower bound of the per-crash delay.
    #[serde(with = "humantime_duration")]
    pub crash_delay_min: Duration,

    /// Upper bound of the per-crash delay.
    #[serde(with = "humantime_duration")]
    pub crash_delay_max: Duration,

    /// Replicas the crash injector must never stop. Always contains 0.
    pub protected: Vec<usize>,

    /// Size of the account space.
    pub accounts: u32,

    /// How account indices are keyed in replica state.
    pub keying: AccountKeying,

    /// How the verifier samples accounts.
    pub sampling: AccountSampling,

    /// RNG seed. `None` seeds from entropy.
    pub seed: Option<u64>,

    /// Per-replica settings.
    pub replica: ReplicaConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            replicas: 10,
            total_transactions: 50_000,
            target_rate: 5_000,
            crashes: 0,
            stagger: Duration::ZERO,
            crash_warmup: Duration::ZERO,
            crash_delay_min: Duration::from_secs(1),
            crash_delay_max: Duration::from_secs(3),
            protected: vec![0],
            accounts: 1024,
            keying: AccountKeying::default(),
            sampling: AccountSampling::default(),
            seed: None,
            replica: ReplicaConfig::default(),
        }
    }
}

impl RunConfig {
    /// Creates a configuration for `replicas` replicas with default settings.
    #[must_use]
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas,
            ..Self::default()
        }
    }

    /// Sets the total transaction budget.
    #[must_use]
    pub const fn with_transactions(mut self, total: u64) -> Self {
        self.total_transactions = total;
        self
    }

    /// Sets the target aggregate rate.
    #[must_use]
    pub const fn with_rate(mut self, rate: u32) -> Self {
        self.target_rate = rate;
        self
    }

    /// Sets the crash count.
    #[must_use]
    pub const fn with_crashes(mut self, crashes: usize) -> Self {
        self.crashes = crashes;
        self
    }

    /// Sets the start stagger.
    #[must_use]
    pub const fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    /// Sets the crash warm-up and per-crash delay interval.
    #[must_use]
    pub const fn with_crash_timing(mut self, warmup: Duration, min: Duration, max: Duration) -> Self {
        self.crash_warmup = warmup;
        self.crash_delay_min = min;
        self.crash_delay_max = max;
        self
    }

    /// Sets the RNG seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the per-replica settings.
    #[must_use]
    pub fn with_replica(mut self, replica: ReplicaConfig) -> Self {
        self.replica = replica;
        self
    }

    /// Per-replica rate `R / N`. The remainder is dropped.
    #[must_use]
    pub fn per_replica_rate(&self) -> u32 {
        match u32::try_from(self.replicas) {
            Ok(0) | Err(_) => 0,
            Ok(n) => self.target_rate / n,
        }
    }

    /// Per-replica budget `T / N`. The remainder is dropped.
    #[must_use]
    pub fn per_replica_transactions(&self) -> u64 {
        if self.replicas == 0 {
            return 0;
        }
        self.total_transactions / self.replicas as u64
    }

    /// Number of transactions the pool issues when nothing crashes.
    #[must_use]
    pub fn expected_network_transactions(&self) -> u64 {
        self.per_replica_transactions() * self.replicas as u64
    }

    /// Returns true if the crash injector must never stop `id`.
    #[must_use]
    pub fn is_protected(&self, id: ReplicaId) -> bool {
        id.is_reporter() || self.protected.contains(&id.index())
    }

    /// Number of replicas the crash injector may stop.
    #[must_use]
    pub fn crash_eligible(&self) -> usize {
        (0..self.replicas)
            .filter(|&i| !self.is_protected(ReplicaId::new(i)))
            .count()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.replicas == 0 {
            return Err(ReplicaError::config("replicas must be at least 1"));
        }

        if !self.protected.contains(&0) {
            return Err(ReplicaError::config(
                "replica 0 is the reporting replica and must be protected",
            ));
        }

        if self.crashes > self.crash_eligible() {
            return Err(ReplicaError::config(format!(
                "cannot crash {} replicas: only {} of {} are unprotected",
                self.crashes,
                self.crash_eligible(),
                self.replicas
            )));
        }

        if self.crash_delay_min > self.crash_delay_max {
            return Err(ReplicaError::config(format!(
                "crash_delay_min ({}) exceeds crash_delay_max ({})",
                humantime::format_duration(self.crash_delay_min),
                humantime::format_duration(self.crash_delay_max)
            )));
        }

        if self.target_rate > 0 && self.per_replica_rate() == 0 {
            return Err(ReplicaError::config(format!(
                "target_rate {} is below one transaction per second for each of {} replicas \
                 (use 0 for unthrottled)",
                self.target_rate, self.replicas
            )));
        }

        if self.accounts < 2 {
            return Err(ReplicaError::config("accounts must be at least 2"));
        }

        self.replica.validate()?;

        Ok(())
    }

    /// Parses and validates a configuration from TOML text.
    ///
    /// # Errors
    /// Returns an error if the text cannot be parsed or is invalid.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ReplicaError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ReplicaError::config(format!("failed to read config: {e}")))?;
        Self::from_toml_str(&content)
    }

    /// Renders the configuration as pretty JSON for logs and reports.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ReplicaError::Internal(format!("failed to serialize config: {e}")))
    }
}

/// Per-replica settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaConfig {
    /// Interval between block production attempts.
    #[serde(with = "humantime_duration")]
    pub block_interval: Duration,

    /// Upper bound on transactions per block.
    pub max_block_transactions: usize,

    /// Quiet period after which a replica whose own broadcast is done terminates.
    #[serde(with = "humantime_duration")]
    pub idle_timeout: Duration,

    /// Capacity of the liveness report channel.
    pub report_capacity: usize,

    /// Opening balance of every account.
    pub initial_balance: i64,

    /// Largest single transfer.
    pub max_transfer: u64,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            block_interval: Duration::from_millis(50),
            max_block_transactions: 2_000,
            idle_timeout: Duration::from_secs(2),
            report_capacity: 64,
            initial_balance: 1_000_000,
            max_transfer: 100,
        }
    }
}

impl ReplicaConfig {
    /// Validates the replica settings.
    ///
    /// # Errors
    /// Returns an error if the settings are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.block_interval.is_zero() {
            return Err(ReplicaError::config("block_interval must be non-zero"));
        }
        if self.max_block_transactions == 0 {
            return Err(ReplicaError::config(
                "max_block_transactions must be at least 1",
            ));
        }
        if self.report_capacity == 0 {
            return Err(ReplicaError::config("report_capacity must be at least 1"));
        }
        if self.max_transfer == 0 {
            return Err(ReplicaError::config("max_transfer must be at least 1"));
        }
        Ok(())
    }
}

/// Serde adapter writing durations as human-readable strings (`"150ms"`).
mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
