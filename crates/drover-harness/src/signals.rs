//! Process signal handling for a run.
//!
//! Termination signals (SIGINT, SIGTERM) request an interrupt through a
//! [`CancellationToken`]. The diagnostic signal (SIGUSR1) dumps every
//! replica's debug state without stopping anything.

use drover_core::{DebugState, ReplicaPool};
use tokio_util::sync::CancellationToken;

/// Logs and returns the debug state of every replica.
pub fn dump_state(pool: &ReplicaPool) -> Vec<DebugState> {
    let states: Vec<_> = pool.iter().map(|replica| replica.debug_state()).collect();
    for state in &states {
        tracing::info!(
            replica = %state.id,
            status = %state.status,
            height = state.height,
            pending = state.pending,
            applied = state.applied,
            "{state}"
        );
    }
    states
}

/// Watches process signals for the duration of a run.
pub struct SignalWatcher {
    pool: ReplicaPool,
    interrupt: CancellationToken,
}

impl SignalWatcher {
    /// Creates a watcher that cancels `interrupt` on a termination signal.
    #[must_use]
    pub fn new(pool: ReplicaPool, interrupt: CancellationToken) -> Self {
        Self { pool, interrupt }
    }

    /// Runs until a termination signal arrives or `interrupt` is cancelled
    /// elsewhere.
    ///
    /// # Errors
    /// Returns an error if the signal handlers cannot be installed.
    #[cfg(unix)]
    pub async fn run(self) -> std::io::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut diagnostic = signal(SignalKind::user_defined1())?;

        loop {
            tokio::select! {
                () = self.interrupt.cancelled() => return Ok(()),
                _ = interrupt.recv() => {
                    tracing::warn!("SIGINT received, interrupting run");
                    break;
                }
                _ = terminate.recv() => {
                    tracing::warn!("SIGTERM received, interrupting run");
                    break;
                }
                _ = diagnostic.recv() => {
                    tracing::info!("SIGUSR1 received, dumping replica state");
                    dump_state(&self.pool);
                }
            }
        }

        self.interrupt.cancel();
        Ok(())
    }

    /// Runs until Ctrl-C arrives or `interrupt` is cancelled elsewhere.
    ///
    /// # Errors
    /// Returns an error if the signal handler cannot be installed.
    #[cfg(not(unix))]
    pub async fn run(self) -> std::io::Result<()> {
        tokio::select! {
            () = self.interrupt.cancelled() => return Ok(()),
            result = tokio::signal::ctrl_c() => result?,
        }
        tracing::warn!("Ctrl-C received, interrupting run");
        self.interrupt.cancel();
        Ok(())
    }
}
