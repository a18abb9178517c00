//! Harness error types.

use drover_core::{ReplicaError, ReplicaId};

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors surfaced by a run.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Run configuration rejected before any replica was created.
    #[error("configuration error: {0}")]
    Config(String),

    /// A replica could not be created or started.
    #[error("replica {replica} failed during startup: {source}")]
    Startup {
        /// The replica that failed.
        replica: ReplicaId,
        /// The underlying replica error.
        #[source]
        source: ReplicaError,
    },

    /// Replica error outside startup.
    #[error("replica error: {0}")]
    Replica(#[from] ReplicaError),

    /// The run was interrupted by a termination signal.
    #[error("run interrupted")]
    Interrupted,

    /// A background task panicked or was cancelled.
    #[error("task join error: {0}")]
    Join(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a startup error for the given replica.
    #[must_use]
    pub const fn startup(replica: ReplicaId, source: ReplicaError) -> Self {
        Self::Startup { replica, source }
    }

    /// Wraps a task join failure.
    #[must_use]
    pub fn join(err: &tokio::task::JoinError) -> Self {
        Self::Join(err.to_string())
    }

    /// Returns true if this error must abort the run with a failure status.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) | Self::Startup { .. } | Self::Io(_) => true,
            Self::Replica(err) => err.is_fatal(),
            Self::Interrupted | Self::Join(_) => false,
        }
    }

    /// Returns true if the error stems from invalid configuration.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Replica(ReplicaError::Config(_)))
    }
}
