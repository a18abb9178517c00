//! Run coordination.
//!
//! # Toyota Way: Built-in Quality (品質の作り込み)
//! Only replica creation and startup can fail a run. Everything observed
//! after that is reported, never fatal.
//!
//! # Run sequence
//! 1. Validate configuration
//! 2. Create every replica (any failure aborts)
//! 3. Launch scheduler, monitor, crash injector and signal watcher
//! 4. Wait for the completion barrier
//! 5. Verify consistency and report

use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use drover_core::{
    CompletionBarrier, Replica, ReplicaFactory, ReplicaId, ReplicaPool, RunConfig, RunId,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chaos::{CrashInjector, CrashPlan, CrashReport};
use crate::error::{HarnessError, Result};
use crate::monitor::{MonitorSummary, ProgressMonitor};
use crate::scheduler::{ScheduleReport, WorkloadPlan, WorkloadScheduler};
use crate::signals::{SignalWatcher, dump_state};
use crate::verifier::{ConsistencyReport, ConsistencyVerifier};

/// Default time the monitor gets to drain after the barrier releases.
pub const DEFAULT_MONITOR_GRACE: Duration = Duration::from_secs(2);

/// Everything a completed run produced.
pub struct RunOutcome {
    /// Run identifier.
    pub run_id: RunId,
    /// Consistency and throughput report.
    pub report: ConsistencyReport,
    /// What the scheduler did.
    pub schedule: ScheduleReport,
    /// Crashes performed.
    pub crashes: CrashReport,
    /// Monitor summary, if the monitor completed cleanly.
    pub monitor: Option<MonitorSummary>,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// The replica pool, for post-run inspection.
    pub pool: ReplicaPool,
}

impl std::fmt::Debug for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOutcome")
            .field("run_id", &self.run_id)
            .field("schedule", &self.schedule)
            .field("crashes", &self.crashes)
            .field("elapsed", &self.elapsed)
            .finish_non_exhaustive()
    }
}

/// Drives one run over a pool built by a [`ReplicaFactory`].
pub struct RunCoordinator {
    config: RunConfig,
    factory: Arc<dyn ReplicaFactory>,
    progress: Box<dyn Write + Send>,
    interrupt: CancellationToken,
    watch_signals: bool,
    monitor_grace: Duration,
}

impl RunCoordinator {
    /// Creates a coordinator printing progress to stdout.
    #[must_use]
    pub fn new(config: RunConfig, factory: Arc<dyn ReplicaFactory>) -> Self {
        Self {
            config,
            factory,
            progress: Box::new(std::io::stdout()),
            interrupt: CancellationToken::new(),
            watch_signals: false,
            monitor_grace: DEFAULT_MONITOR_GRACE,
        }
    }

    /// Sends the progress grid to `sink`.
    #[must_use]
    pub fn with_progress(mut self, sink: impl Write + Send + 'static) -> Self {
        self.progress = Box::new(sink);
        self
    }

    /// Installs process signal handlers for the run.
    #[must_use]
    pub const fn with_signals(mut self, enabled: bool) -> Self {
        self.watch_signals = enabled;
        self
    }

    /// Uses `token` as the interrupt request. Cancelling it ends the run
    /// with [`HarnessError::Interrupted`].
    #[must_use]
    pub fn with_interrupt(mut self, token: CancellationToken) -> Self {
        self.interrupt = token;
        self
    }

    /// Sets how long the monitor may drain after the barrier releases.
    #[must_use]
    pub const fn with_monitor_grace(mut self, grace: Duration) -> Self {
        self.monitor_grace = grace;
        self
    }

    /// Returns the run configuration.
    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Creates replicas `0..N`.
    ///
    /// # Errors
    /// Returns an error if any replica cannot be created.
    pub fn create_pool(&self) -> impl Future<Output = Result<ReplicaPool>> + Send + 'static {
        let factory = Arc::clone(&self.factory);
        let total = self.config.replicas;
        async move { create_pool(factory.as_ref(), total).await }
    }

    /// Runs to completion.
    ///
    /// # Errors
    /// Returns an error if configuration is invalid, a replica fails to be
    /// created or started, or the run is interrupted.
    pub async fn run(self) -> Result<RunOutcome> {
        // The progress sink is not `Sync`; nothing may borrow `self` across an await.
        let Self {
            config,
            factory,
            progress,
            interrupt,
            watch_signals,
            monitor_grace,
        } = self;

        config
            .validate()
            .map_err(|e| HarnessError::config(e.to_string()))?;

        let run_id = RunId::new();
        let started = Instant::now();
        tracing::info!(
            run_id = %run_id,
            replicas = config.replicas,
            transactions = config.total_transactions,
            rate = config.target_rate,
            crashes = config.crashes,
            "starting run"
        );

        let pool = create_pool(factory.as_ref(), config.replicas).await?;
        let (barrier, guards) = CompletionBarrier::new(pool.len());

        // Channels are taken before any replica starts, so no signal is lost.
        let mut monitor = ProgressMonitor::from_pool(Arc::clone(&pool), progress);
        let monitor_task = tokio::spawn(async move { monitor.run().await });

        let scheduler =
            WorkloadScheduler::new(WorkloadPlan::from_config(&config), Arc::clone(&pool), guards);
        let mut scheduler_task = tokio::spawn(scheduler.run());

        let injector_done = CancellationToken::new();
        let injector_task = tokio::spawn(
            CrashInjector::new(CrashPlan::from_config(&config), Arc::clone(&pool))
                .with_cancel(injector_done.clone())
                .run(),
        );

        let signal_task = watch_signals.then(|| {
            tokio::spawn(SignalWatcher::new(Arc::clone(&pool), interrupt.clone()).run())
        });

        let mut schedule = None;
        loop {
            tokio::select! {
                biased;

                () = interrupt.cancelled() => {
                    tracing::warn!(run_id = %run_id, "run interrupted");
                    dump_state(&pool);
                    abort_run(&pool, &injector_done, signal_task);
                    return Err(HarnessError::Interrupted);
                }

                joined = &mut scheduler_task, if schedule.is_none() => {
                    match flatten(joined) {
                        Ok(report) => schedule = Some(report),
                        Err(err) => {
                            tracing::error!(error = %err, "workload scheduling failed");
                            abort_run(&pool, &injector_done, signal_task);
                            return Err(err);
                        }
                    }
                }

                () = barrier.wait() => break,
            }
        }

        let schedule = match schedule {
            Some(report) => report,
            // Released by guards dropped on a failing schedule.
            None => match flatten(scheduler_task.await) {
                Ok(report) => report,
                Err(err) => {
                    tracing::error!(error = %err, "workload scheduling failed");
                    abort_run(&pool, &injector_done, signal_task);
                    return Err(err);
                }
            },
        };
        tracing::info!(run_id = %run_id, elapsed = ?started.elapsed(), "all replicas terminated");

        injector_done.cancel();
        let crashes = injector_task.await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "crash injector failed");
            CrashReport::default()
        });

        let monitor = match tokio::time::timeout(monitor_grace, monitor_task).await {
            Ok(Ok(Ok(summary))) => Some(summary),
            Ok(Ok(Err(e))) => {
                tracing::warn!(error = %e, "progress monitor failed");
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "progress monitor task failed");
                None
            }
            Err(_) => {
                tracing::warn!(grace = ?monitor_grace, "progress monitor did not drain in time");
                None
            }
        };

        if let Some(task) = signal_task {
            task.abort();
        }

        let report = ConsistencyVerifier::from_config(&config).verify(&pool);
        let elapsed = started.elapsed();
        tracing::info!(
            run_id = %run_id,
            confirmed = report.throughput.confirmed,
            crashes = crashes.injected.len(),
            elapsed = ?elapsed,
            "run complete"
        );

        Ok(RunOutcome {
            run_id,
            report,
            schedule,
            crashes,
            monitor,
            elapsed,
            pool,
        })
    }
}

fn flatten<T>(joined: std::result::Result<Result<T>, tokio::task::JoinError>) -> Result<T> {
    joined.map_err(|e| HarnessError::join(&e))?
}

async fn create_pool(factory: &dyn ReplicaFactory, total: usize) -> Result<ReplicaPool> {
    let mut replicas: Vec<Arc<dyn Replica>> = Vec::with_capacity(total);

    for index in 0..total {
        let id = ReplicaId::new(index);
        let replica = factory
            .create(id, total)
            .await
            .map_err(|source| HarnessError::startup(id, source))?;
        replicas.push(replica);
    }

    tracing::debug!(replicas = total, "replica pool created");
    Ok(replicas.into())
}

fn stop_all(pool: &ReplicaPool) -> usize {
    pool.iter().filter(|replica| replica.stop()).count()
}

fn abort_run(
    pool: &ReplicaPool,
    injector_done: &CancellationToken,
    signal_task: Option<JoinHandle<std::io::Result<()>>>,
) {
    injector_done.cancel();
    let stopped = stop_all(pool);
    tracing::debug!(stopped, "stopped remaining replicas");
    if let Some(task) = signal_task {
        task.abort();
    }
}
