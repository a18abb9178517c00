//! Error types for drover-core.
//!
//! Per Iron Lotus Framework: All errors are explicit, no panics allowed.

use crate::types::ReplicaId;

/// Result type alias for replica operations.
pub type Result<T> = std::result::Result<T, ReplicaError>;

/// Error type for replica creation, lifecycle and configuration.
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    /// Configuration error (run or replica configuration is unusable).
    #[error("configuration error: {0}")]
    Config(String),

    /// Replica failed to start.
    #[error("replica {replica} failed to start: {reason}")]
    Start {
        /// The replica that failed.
        replica: ReplicaId,
        /// Why it failed.
        reason: String,
    },

    /// Invalid state for operation.
    #[error("invalid state: {0}")]
    State(String),

    /// Broadcast request rejected.
    #[error("broadcast rejected: {0}")]
    Broadcast(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (should not occur in production).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReplicaError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a start error for the given replica.
    #[must_use]
    pub fn start(replica: ReplicaId, reason: impl Into<String>) -> Self {
        Self::Start {
            replica,
            reason: reason.into(),
        }
    }

    /// Creates an invalid-state error.
    #[must_use]
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Creates a broadcast error.
    #[must_use]
    pub fn broadcast(msg: impl Into<String>) -> Self {
        Self::Broadcast(msg.into())
    }

    /// Returns true if this error must abort the run.
    ///
    /// Creation and startup failures are fatal; a rejected broadcast on a
    /// replica that has already been stopped is not.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Start { .. } | Self::Io(_) | Self::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ReplicaError::config("replicas must be at least 1");
        assert_eq!(
            err.to_string(),
            "configuration error: replicas must be at least 1"
        );
    }

    #[test]
    fn test_start_error_names_replica() {
        let err = ReplicaError::start(ReplicaId::new(3), "inbox already taken");
        let msg = err.to_string();
        assert!(msg.contains("replica 3"));
        assert!(msg.contains("inbox already taken"));
    }

    #[test]
    fn test_error_fatal() {
        assert!(ReplicaError::config("bad").is_fatal());
        assert!(ReplicaError::start(ReplicaId::new(0), "boom").is_fatal());
        assert!(!ReplicaError::broadcast("stopped").is_fatal());
        assert!(!ReplicaError::state("already running").is_fatal());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        let err: ReplicaError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
        assert!(err.is_fatal());
    }
}
