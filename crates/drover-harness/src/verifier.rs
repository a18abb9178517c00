//! Post-run consistency and throughput verification.
//!
//! # Toyota Way: Genchi Genbutsu (現地現物)
//! Go and see: read every replica's actual balances instead of trusting
//! counters.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use drover_core::{
    AccountId, AccountKeying, AccountSampling, Replica, ReplicaId, ReplicaPool, ReplicaStatus,
    RunConfig,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::error::Result;

/// Seed offset so account sampling doesn't mirror other seeded decisions.
const SAMPLE_SEED_SALT: u64 = 0x7361_6d70_6c65;

/// One replica's row in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaRow {
    /// Replica position.
    pub id: ReplicaId,
    /// Lifecycle state at verification time.
    pub status: ReplicaStatus,
    /// Ledger height.
    pub height: u64,
    /// Balance per sampled account; `None` if the replica lacks the account.
    pub balances: Vec<Option<i64>>,
}

/// Throughput derived from the reference replica's ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Throughput {
    /// Reference replica.
    pub reference: ReplicaId,
    /// Ledger height of the reference replica.
    pub height: u64,
    /// Confirmed transactions across all its blocks.
    pub confirmed: u64,
    /// Seconds between its first and last block timestamps.
    pub span_secs: f64,
    /// Confirmed transactions per second. `None` without a positive span.
    pub tps: Option<f64>,
    /// Bytes received per second of span, when tracked.
    pub traffic_in_per_sec: Option<f64>,
    /// Bytes sent per second of span, when tracked.
    pub traffic_out_per_sec: Option<f64>,
}

impl Throughput {
    /// Measures throughput from `replica`'s ledger.
    ///
    /// An empty ledger yields zero activity and no rates.
    #[must_use]
    pub fn measure(replica: &dyn Replica) -> Self {
        let ledger = replica.ledger();
        let mut throughput = Self {
            reference: replica.id(),
            height: ledger.len() as u64,
            ..Self::default()
        };

        let (Some(first), Some(last)) = (ledger.first(), ledger.last()) else {
            return throughput;
        };

        throughput.confirmed = ledger
            .iter()
            .map(|block| block.transactions.len() as u64)
            .sum();

        let span = (last.timestamp - first.timestamp)
            .to_std()
            .unwrap_or(Duration::ZERO);
        throughput.span_secs = span.as_secs_f64();

        if throughput.span_secs > 0.0 {
            throughput.tps = Some(throughput.confirmed as f64 / throughput.span_secs);
            if let Some(traffic) = replica.traffic() {
                throughput.traffic_in_per_sec = Some(traffic.bytes_in as f64 / throughput.span_secs);
                throughput.traffic_out_per_sec =
                    Some(traffic.bytes_out as f64 / throughput.span_secs);
            }
        }

        throughput
    }
}

/// Verifier output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyReport {
    /// Sampled accounts, in column order. Duplicates are allowed.
    pub accounts: Vec<AccountId>,
    /// One row per replica, in pool order.
    pub rows: Vec<ReplicaRow>,
    /// Throughput of the reference replica.
    pub throughput: Throughput,
    /// Replicas that finished on their own.
    pub finished: Vec<ReplicaId>,
    /// Accounts on which naturally finished replicas disagree.
    pub divergent: Vec<AccountId>,
}

impl ConsistencyReport {
    /// Returns true if every naturally finished replica holds the same
    /// account state.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.divergent.is_empty()
    }

    /// Serializes the report as pretty JSON.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| std::io::Error::other(e).into())
    }
}

fn fmt_rate(rate: Option<f64>) -> String {
    rate.map_or_else(|| "n/a".to_string(), |r| format!("{r:.2}"))
}

impl fmt::Display for ConsistencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const ROW_LABEL: usize = 22;

        write!(f, "{:ROW_LABEL$}", "")?;
        for account in &self.accounts {
            write!(f, "{:>12}", format!("acct{account}"))?;
        }
        writeln!(f)?;

        for row in &self.rows {
            let label = format!("Node:{} Height:{}", row.id, row.height);
            write!(f, "{label:<ROW_LABEL$}")?;
            for balance in &row.balances {
                match balance {
                    Some(balance) => write!(f, "{balance:>12}")?,
                    None => write!(f, "{:>12}", "-")?,
                }
            }
            if row.status == ReplicaStatus::Stopped {
                write!(f, "  (stopped)")?;
            }
            writeln!(f)?;
        }

        let t = &self.throughput;
        writeln!(
            f,
            "Txs confirmed: {}  Time: {:.2}s  Tps: {}",
            t.confirmed,
            t.span_secs,
            fmt_rate(t.tps)
        )?;
        writeln!(
            f,
            "Traffic In/s: {}  Traffic out/s: {}",
            fmt_rate(t.traffic_in_per_sec),
            fmt_rate(t.traffic_out_per_sec)
        )?;

        if self.divergent.is_empty() {
            write!(f, "Consistent across {} finished replicas", self.finished.len())
        } else {
            let accounts: Vec<_> = self.divergent.iter().map(ToString::to_string).collect();
            write!(f, "Divergent accounts: {}", accounts.join(", "))
        }
    }
}

/// Samples accounts and compares replica state after a run.
#[derive(Debug, Clone)]
pub struct ConsistencyVerifier {
    samples: usize,
    accounts: u32,
    keying: AccountKeying,
    sampling: AccountSampling,
    seed: Option<u64>,
}

impl ConsistencyVerifier {
    /// Creates a verifier sampling `samples` accounts out of `accounts`.
    #[must_use]
    pub fn new(samples: usize, accounts: u32) -> Self {
        Self {
            samples,
            accounts,
            keying: AccountKeying::default(),
            sampling: AccountSampling::default(),
            seed: None,
        }
    }

    /// Builds a verifier matching a run configuration: one sampled
    /// account per replica.
    #[must_use]
    pub fn from_config(config: &RunConfig) -> Self {
        let mut verifier = Self::new(config.replicas, config.accounts)
            .with_keying(config.keying)
            .with_sampling(config.sampling);
        verifier.seed = config.seed.map(|seed| seed ^ SAMPLE_SEED_SALT);
        verifier
    }

    /// Sets the account keying.
    #[must_use]
    pub const fn with_keying(mut self, keying: AccountKeying) -> Self {
        self.keying = keying;
        self
    }

    /// Sets the sampling mode.
    #[must_use]
    pub const fn with_sampling(mut self, sampling: AccountSampling) -> Self {
        self.sampling = sampling;
        self
    }

    /// Sets the sampling seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Picks the accounts to compare.
    #[must_use]
    pub fn sample_accounts(&self) -> Vec<AccountId> {
        let space = self.accounts.max(1);
        match self.sampling {
            AccountSampling::Random => {
                let mut rng = match self.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                (0..self.samples)
                    .map(|_| self.keying.key(rng.gen_range(0..space)))
                    .collect()
            }
            AccountSampling::Leading => (0..self.samples)
                .map(|i| self.keying.key(i as u32 % space))
                .collect(),
        }
    }

    /// Verifies the pool. Replica 0 is the throughput reference.
    #[must_use]
    pub fn verify(&self, pool: &ReplicaPool) -> ConsistencyReport {
        let accounts = self.sample_accounts();

        let rows = pool
            .iter()
            .map(|replica| ReplicaRow {
                id: replica.id(),
                status: replica.status(),
                height: replica.height(),
                balances: accounts
                    .iter()
                    .map(|account| replica.account(account).map(|state| state.balance))
                    .collect(),
            })
            .collect();

        let throughput = pool
            .first()
            .map(|reference| Throughput::measure(reference.as_ref()))
            .unwrap_or_default();

        let finished: Vec<_> = pool
            .iter()
            .filter(|replica| replica.status() == ReplicaStatus::Finished)
            .map(|replica| replica.id())
            .collect();
        let divergent = divergent_accounts(pool, &finished);

        if divergent.is_empty() {
            tracing::info!(finished = finished.len(), "replica state consistent");
        } else {
            tracing::warn!(
                finished = finished.len(),
                divergent = divergent.len(),
                "replica state diverged"
            );
        }

        ConsistencyReport {
            accounts,
            rows,
            throughput,
            finished,
            divergent,
        }
    }
}

/// Compares full account state across `members`.
fn divergent_accounts(pool: &ReplicaPool, members: &[ReplicaId]) -> Vec<AccountId> {
    let snapshots: Vec<_> = members
        .iter()
        .filter_map(|id| pool.get(id.index()))
        .map(|replica| replica.accounts())
        .collect();

    let Some((first, rest)) = snapshots.split_first() else {
        return Vec::new();
    };

    let keys: BTreeSet<&AccountId> = snapshots.iter().flat_map(|s| s.keys()).collect();
    keys.into_iter()
        .filter(|key| {
            let expected = first.get(*key);
            rest.iter().any(|snapshot| snapshot.get(*key) != expected)
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{MockReplica, mock_pool};
    use drover_core::CompletionBarrier;

    #[test]
    fn test_leading_sampling() {
        let verifier = ConsistencyVerifier::new(3, 10).with_sampling(AccountSampling::Leading);
        assert_eq!(
            verifier.sample_accounts(),
            vec![AccountId::Index(0), AccountId::Index(1), AccountId::Index(2)]
        );

        let named = verifier.with_keying(AccountKeying::Named);
        assert_eq!(named.sample_accounts()[2], AccountId::Name("2".into()));
    }

    #[test]
    fn test_leading_sampling_wraps_account_space() {
        let verifier = ConsistencyVerifier::new(5, 2).with_sampling(AccountSampling::Leading);
        let samples = verifier.sample_accounts();
        assert_eq!(samples.len(), 5);
        assert_eq!(samples[4], AccountId::Index(0));
    }

    #[test]
    fn test_random_sampling_in_range_and_seeded() {
        let verifier = ConsistencyVerifier::new(50, 8).with_seed(3);
        let samples = verifier.sample_accounts();
        assert_eq!(samples.len(), 50);
        assert!(samples
            .iter()
            .all(|a| matches!(a, AccountId::Index(i) if *i < 8)));
        assert_eq!(samples, verifier.sample_accounts());
    }

    #[test]
    fn test_empty_ledger_has_no_throughput() {
        let (pool, _mocks) = mock_pool(2, MockReplica::new);
        let report = ConsistencyVerifier::new(2, 4).verify(&pool);

        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.throughput.height, 0);
        assert_eq!(report.throughput.confirmed, 0);
        assert_eq!(report.throughput.span_secs, 0.0);
        assert!(report.throughput.tps.is_none());
        assert!(report.throughput.traffic_in_per_sec.is_none());
        assert!(report.to_string().contains("Tps: n/a"));
    }

    #[test]
    fn test_empty_pool() {
        let (pool, _mocks) = mock_pool(0, MockReplica::new);
        let report = ConsistencyVerifier::new(0, 4).verify(&pool);
        assert!(report.rows.is_empty());
        assert!(report.is_consistent());
    }

    #[tokio::test]
    async fn test_throughput_from_reference_span() {
        let (pool, mocks) = mock_pool(1, |id| {
            MockReplica::new(id)
                .finish_after(5)
                .block_size(4)
                .block_interval(Duration::from_millis(20))
        });
        let (barrier, mut guards) = CompletionBarrier::new(1);
        mocks[0].start(guards.remove(0)).await.unwrap();
        barrier.wait().await;

        let report = ConsistencyVerifier::new(1, 4).verify(&pool);
        let t = report.throughput;
        assert_eq!(t.height, 5);
        assert_eq!(t.confirmed, 20);
        assert!(t.span_secs > 0.0);
        let tps = t.tps.unwrap();
        assert!((tps - 20.0 / t.span_secs).abs() < 1e-9);
        assert!(t.traffic_in_per_sec.unwrap() > 0.0);
        assert_eq!(report.finished, vec![ReplicaId::new(0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_divergence_detected_among_finished() {
        let (pool, mocks) = mock_pool(3, |id| match id.index() {
            1 => MockReplica::new(id).finish_after(1).balance(7),
            _ => MockReplica::new(id).finish_after(1),
        });
        let (barrier, guards) = CompletionBarrier::new(3);
        for (mock, guard) in mocks.iter().zip(guards) {
            mock.start(guard).await.unwrap();
        }
        barrier.wait().await;

        let report = ConsistencyVerifier::new(3, 4)
            .with_sampling(AccountSampling::Leading)
            .verify(&pool);
        assert!(!report.is_consistent());
        assert_eq!(report.divergent.len(), 4);
        assert_eq!(report.rows[1].balances, vec![Some(7); 3]);
        assert!(report.to_string().contains("Divergent accounts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_replicas_excluded_from_divergence() {
        let (pool, mocks) = mock_pool(2, |id| match id.index() {
            1 => MockReplica::new(id).run_forever().balance(7),
            _ => MockReplica::new(id).finish_after(1),
        });
        let (barrier, guards) = CompletionBarrier::new(2);
        for (mock, guard) in mocks.iter().zip(guards) {
            mock.start(guard).await.unwrap();
        }
        mocks[1].stop();
        barrier.wait().await;

        let report = ConsistencyVerifier::new(2, 4).verify(&pool);
        assert!(report.is_consistent());
        assert_eq!(report.finished, vec![ReplicaId::new(0)]);
        assert_eq!(report.rows[1].status, ReplicaStatus::Stopped);
        assert!(report.to_string().contains("(stopped)"));
    }

    #[test]
    fn test_report_table_layout() {
        let report = ConsistencyReport {
            accounts: vec![AccountId::Index(3), AccountId::Index(9)],
            rows: vec![ReplicaRow {
                id: ReplicaId::new(0),
                status: ReplicaStatus::Finished,
                height: 12,
                balances: vec![Some(1_000), None],
            }],
            throughput: Throughput {
                confirmed: 300,
                span_secs: 1.5,
                tps: Some(200.0),
                ..Throughput::default()
            },
            finished: vec![ReplicaId::new(0)],
            divergent: Vec::new(),
        };

        let table = report.to_string();
        let lines: Vec<_> = table.lines().collect();
        assert!(lines[0].contains("acct3"));
        assert!(lines[0].contains("acct9"));
        assert!(lines[1].starts_with("Node:0 Height:12"));
        assert!(lines[1].contains("1000"));
        assert!(lines[1].trim_end().ends_with('-'));
        assert_eq!(lines[2], "Txs confirmed: 300  Time: 1.50s  Tps: 200.00");
        assert!(lines[3].starts_with("Traffic In/s: n/a"));

        let json = report.to_json().unwrap();
        assert!(json.contains("\"confirmed\": 300"));
    }
}
