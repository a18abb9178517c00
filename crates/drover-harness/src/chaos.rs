//! Crash injection for resilience testing.
//!
//! # Reference
//! Netflix. (2012). Chaos Monkey. GitHub.
//! <https://github.com/Netflix/chaosmonkey>
//!
//! The injector stops a bounded number of running replicas on a
//! randomized schedule. Protected replicas (always including replica 0)
//! are never targeted, and liveness is re-checked at the moment of
//! selection.

use std::time::Duration;

use drover_core::{ReplicaId, ReplicaPool, RunConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Seed offset so crash decisions don't mirror transaction generation.
const CRASH_SEED_SALT: u64 = 0x6372_6173_6821;

/// Crash schedule configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashPlan {
    /// Number of replicas to stop.
    pub crashes: usize,
    /// Fixed delay before the first scheduling step.
    pub warmup: Duration,
    /// Lower bound of the per-crash delay.
    pub delay_min: Duration,
    /// Upper bound of the per-crash delay.
    pub delay_max: Duration,
    /// Replica indices never targeted. Replica 0 is always protected.
    pub protected: Vec<usize>,
    /// RNG seed for reproducible schedules.
    pub seed: Option<u64>,
}

impl Default for CrashPlan {
    fn default() -> Self {
        Self {
            crashes: 0,
            warmup: Duration::ZERO,
            delay_min: Duration::from_secs(1),
            delay_max: Duration::from_secs(3),
            protected: vec![0],
            seed: None,
        }
    }
}

impl CrashPlan {
    /// Creates a plan for `crashes` crashes with default timing.
    #[must_use]
    pub fn new(crashes: usize) -> Self {
        Self {
            crashes,
            ..Self::default()
        }
    }

    /// Builds the plan from a run configuration.
    #[must_use]
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            crashes: config.crashes,
            warmup: config.crash_warmup,
            delay_min: config.crash_delay_min,
            delay_max: config.crash_delay_max,
            protected: config.protected.clone(),
            seed: config.seed.map(|seed| seed ^ CRASH_SEED_SALT),
        }
    }

    /// Sets the per-crash delay bounds.
    #[must_use]
    pub const fn with_delays(mut self, min: Duration, max: Duration) -> Self {
        self.delay_min = min;
        self.delay_max = max;
        self
    }

    /// Sets the warm-up delay.
    #[must_use]
    pub const fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    /// Sets the RNG seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Returns true if `id` must never be targeted.
    #[must_use]
    pub fn is_protected(&self, id: ReplicaId) -> bool {
        id.is_reporter() || self.protected.contains(&id.index())
    }
}

/// One performed crash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrashEvent {
    /// Position in the schedule, starting at 0.
    pub ordinal: usize,
    /// Replica stopped.
    pub target: ReplicaId,
    /// Delay waited before this crash.
    pub delay: Duration,
}

/// Outcome of a crash schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrashReport {
    /// Crashes performed, in order.
    pub injected: Vec<CrashEvent>,
    /// Samples rejected because the target was protected or not running.
    pub misses: u64,
    /// True if the schedule ended early for lack of eligible targets.
    pub exhausted: bool,
    /// True if the schedule was cancelled before completing.
    pub cancelled: bool,
}

impl CrashReport {
    /// Returns the stopped replicas, in order.
    #[must_use]
    pub fn targets(&self) -> Vec<ReplicaId> {
        self.injected.iter().map(|event| event.target).collect()
    }
}

/// Crash injector over a replica pool.
pub struct CrashInjector {
    plan: CrashPlan,
    pool: ReplicaPool,
    rng: StdRng,
    cancel: CancellationToken,
}

impl CrashInjector {
    /// Creates a new crash injector.
    #[must_use]
    pub fn new(plan: CrashPlan, pool: ReplicaPool) -> Self {
        let rng = match plan.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            plan,
            pool,
            rng,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `cancel` to end the schedule early.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the crash plan.
    #[must_use]
    pub const fn plan(&self) -> &CrashPlan {
        &self.plan
    }

    /// Runs the schedule to completion, exhaustion or cancellation.
    pub async fn run(mut self) -> CrashReport {
        let mut report = CrashReport::default();
        if self.plan.crashes == 0 {
            return report;
        }

        tracing::warn!(
            crashes = self.plan.crashes,
            warmup = ?self.plan.warmup,
            "starting crash injection"
        );

        if !self.plan.warmup.is_zero() && !self.pause(self.plan.warmup).await {
            report.cancelled = true;
            return report;
        }

        'schedule: for ordinal in 0..self.plan.crashes {
            let delay = self.sample_delay();
            if !self.pause(delay).await {
                report.cancelled = true;
                break;
            }

            loop {
                let Some(target) = self.pick_target(&mut report.misses) else {
                    tracing::warn!(ordinal, "no eligible crash target left");
                    report.exhausted = true;
                    break 'schedule;
                };

                if self.pool[target.index()].stop() {
                    tracing::info!(replica = %target, ordinal, "Node {target} stopped!");
                    report.injected.push(CrashEvent {
                        ordinal,
                        target,
                        delay,
                    });
                    break;
                }

                // Terminated between the liveness check and the stop.
                report.misses += 1;
            }
        }

        tracing::info!(
            injected = report.injected.len(),
            misses = report.misses,
            "crash injection finished"
        );
        report
    }

    /// Sleeps for `delay`. Returns false if cancelled first.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    fn sample_delay(&mut self) -> Duration {
        let (min, max) = (self.plan.delay_min, self.plan.delay_max);
        if min >= max {
            min
        } else {
            self.rng.gen_range(min..=max)
        }
    }

    fn is_eligible(&self, id: ReplicaId) -> bool {
        !self.plan.is_protected(id) && self.pool[id.index()].is_running()
    }

    /// Samples uniformly from the whole pool, at most pool-size times,
    /// then falls back to a uniform pick among the currently eligible.
    fn pick_target(&mut self, misses: &mut u64) -> Option<ReplicaId> {
        let size = self.pool.len();
        if size == 0 {
            return None;
        }

        for _ in 0..size {
            let candidate = ReplicaId::new(self.rng.gen_range(0..size));
            if self.is_eligible(candidate) {
                return Some(candidate);
            }
            *misses += 1;
        }

        let eligible: Vec<_> = (0..size)
            .map(ReplicaId::new)
            .filter(|&id| self.is_eligible(id))
            .collect();
        if eligible.is_empty() {
            return None;
        }
        Some(eligible[self.rng.gen_range(0..eligible.len())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{MockReplica, mock_pool};
    use drover_core::{CompletionBarrier, Replica, ReplicaStatus};
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    async fn started_pool(
        n: usize,
    ) -> (ReplicaPool, Vec<Arc<MockReplica>>, CompletionBarrier) {
        let (pool, mocks) = mock_pool(n, |id| MockReplica::new(id).run_forever());
        let (barrier, guards) = CompletionBarrier::new(n);
        for (mock, guard) in mocks.iter().zip(guards) {
            mock.start(guard).await.unwrap();
        }
        (pool, mocks, barrier)
    }

    fn fast_plan(crashes: usize, seed: u64) -> CrashPlan {
        CrashPlan::new(crashes)
            .with_delays(Duration::from_millis(10), Duration::from_millis(30))
            .with_seed(seed)
    }

    #[test]
    fn test_crash_plan_default() {
        let plan = CrashPlan::default();
        assert_eq!(plan.crashes, 0);
        assert_eq!(plan.delay_min, Duration::from_secs(1));
        assert_eq!(plan.delay_max, Duration::from_secs(3));
        assert!(plan.is_protected(ReplicaId::new(0)));
        assert!(!plan.is_protected(ReplicaId::new(1)));
    }

    #[test]
    fn test_crash_plan_from_config() {
        let mut config = RunConfig::new(6).with_crashes(2).with_seed(11);
        config.protected = vec![0, 3];
        let plan = CrashPlan::from_config(&config);

        assert_eq!(plan.crashes, 2);
        assert!(plan.is_protected(ReplicaId::new(3)));
        assert_eq!(plan.seed, Some(11 ^ CRASH_SEED_SALT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_crashes_is_a_no_op() {
        let (pool, mocks, _barrier) = started_pool(3).await;
        let report = CrashInjector::new(CrashPlan::new(0), pool).run().await;

        assert!(report.injected.is_empty());
        assert!(!report.exhausted);
        assert!(mocks.iter().all(|m| m.stop_calls() == 0));
        for mock in &mocks {
            mock.stop();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exact_crash_count_never_replica_zero() {
        let (pool, mocks, _barrier) = started_pool(5).await;
        let report = CrashInjector::new(fast_plan(3, 5), pool).run().await;

        assert_eq!(report.injected.len(), 3);
        let targets: HashSet<_> = report.targets().into_iter().collect();
        assert_eq!(targets.len(), 3);
        assert!(!targets.contains(&ReplicaId::new(0)));

        assert_eq!(mocks[0].stop_calls(), 0);
        let stopped = mocks
            .iter()
            .filter(|m| m.status() == ReplicaStatus::Stopped)
            .count();
        assert_eq!(stopped, 3);
        for event in &report.injected {
            assert!(event.delay >= Duration::from_millis(10));
            assert!(event.delay <= Duration::from_millis(30));
        }
        for mock in &mocks {
            mock.stop();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_ends_early() {
        // Only replicas 1 and 2 are eligible, three crashes requested.
        let (pool, mocks, _barrier) = started_pool(3).await;
        let report = CrashInjector::new(fast_plan(3, 1), pool).run().await;

        assert_eq!(report.injected.len(), 2);
        assert!(report.exhausted);
        assert_eq!(mocks[0].status(), ReplicaStatus::Running);
        mocks[0].stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_replicas_are_not_targeted() {
        let (pool, mocks) = mock_pool(3, |id| match id.index() {
            1 => MockReplica::new(id).finish_after(1),
            _ => MockReplica::new(id).run_forever(),
        });
        let (_barrier, guards) = CompletionBarrier::new(3);
        for (mock, guard) in mocks.iter().zip(guards) {
            mock.start(guard).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mocks[1].status(), ReplicaStatus::Finished);

        let report = CrashInjector::new(fast_plan(1, 3), pool).run().await;
        assert_eq!(report.targets(), vec![ReplicaId::new(2)]);
        assert_eq!(mocks[1].stop_calls(), 0);
        mocks[0].stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_extra_protected_replicas() {
        let (pool, mocks, _barrier) = started_pool(4).await;
        let mut plan = fast_plan(2, 9);
        plan.protected = vec![0, 2];

        let report = CrashInjector::new(plan, pool).run().await;
        let mut targets = report.targets();
        targets.sort();
        assert_eq!(targets, vec![ReplicaId::new(1), ReplicaId::new(3)]);
        assert_eq!(mocks[2].stop_calls(), 0);
        mocks[0].stop();
        mocks[2].stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_warmup_delays_first_crash() {
        let (pool, mocks, _barrier) = started_pool(2).await;
        let plan = fast_plan(1, 2).with_warmup(Duration::from_secs(25));
        let started = tokio::time::Instant::now();

        let report = CrashInjector::new(plan, pool).run().await;
        assert_eq!(report.injected.len(), 1);
        assert!(started.elapsed() >= Duration::from_secs(25));
        mocks[0].stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_schedule() {
        let (pool, mocks, _barrier) = started_pool(3).await;
        let cancel = CancellationToken::new();
        let plan = CrashPlan::new(2).with_delays(Duration::from_secs(10), Duration::from_secs(10));
        let injector = CrashInjector::new(plan, pool).with_cancel(cancel.clone());

        let handle = tokio::spawn(injector.run());
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let report = handle.await.unwrap();
        assert!(report.cancelled);
        assert!(report.injected.is_empty());
        for mock in &mocks {
            assert_eq!(mock.stop_calls(), 0);
            mock.stop();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeded_schedule_is_reproducible() {
        let mut runs = Vec::new();
        for _ in 0..2 {
            let (pool, mocks, _barrier) = started_pool(8).await;
            let report = CrashInjector::new(fast_plan(4, 77), pool).run().await;
            runs.push(report.injected);
            for mock in &mocks {
                mock.stop();
            }
        }
        assert_eq!(runs[0], runs[1]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_crashes_distinct_and_protected(
            replicas in 2usize..10,
            crashes in 0usize..10,
            seed in any::<u64>(),
        ) {
            let crashes = crashes.min(replicas - 1);
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            let (report, stops) = runtime.block_on(async {
                let (pool, mocks, _barrier) = started_pool(replicas).await;
                let report = CrashInjector::new(fast_plan(crashes, seed), pool).run().await;
                let stops: Vec<u32> = mocks.iter().map(|m| m.stops()).collect();
                for mock in &mocks {
                    mock.stop();
                }
                (report, stops)
            });

            prop_assert_eq!(report.injected.len(), crashes);
            prop_assert!(!report.exhausted);
            prop_assert_eq!(stops[0], 0);
            prop_assert_eq!(stops.iter().sum::<u32>() as usize, crashes);
            let distinct: HashSet<_> = report.targets().into_iter().collect();
            prop_assert_eq!(distinct.len(), crashes);
        }
    }
}
