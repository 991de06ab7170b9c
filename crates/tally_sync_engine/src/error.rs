//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// How a failure affects the record or run it happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The server refused the payload.
    Validation,
    /// The server could not be reached; try again later.
    Network,
    /// Anything else.
    Other,
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The server rejected the payload as invalid.
    #[error("server rejected request: {0}")]
    Validation(String),

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server failed to process the request.
    #[error("server error: {0}")]
    ServerError(String),

    /// A request was abandoned before it completed.
    #[error("request cancelled")]
    Cancelled,

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The local store refused to commit.
    #[error("failed to commit {phase} changes")]
    CommitFailed {
        /// Phase whose changes were lost.
        phase: &'static str,
    },

    /// The push phase stopped with records still waiting.
    #[error("push stalled with {remaining} records left in the dependency graph")]
    Stalled {
        /// Records that could not be scheduled.
        remaining: usize,
    },
}

impl SyncError {
    /// Creates a validation rejection.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a retryable transport error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Classifies the error.
    ///
    /// Cancellation and timeouts are treated as network failures.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SyncError::Validation(_) => FailureKind::Validation,
            SyncError::Transport { .. } | SyncError::Cancelled | SyncError::Timeout => {
                FailureKind::Network
            }
            _ => FailureKind::Other,
        }
    }

    /// Returns true if the server could not be reached. Excludes cancellation.
    pub fn is_network_failure(&self) -> bool {
        matches!(self, SyncError::Transport { .. } | SyncError::Timeout)
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::ServerError(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(
            SyncError::validation("bad name").failure_kind(),
            FailureKind::Validation
        );
        assert_eq!(
            SyncError::network("offline").failure_kind(),
            FailureKind::Network
        );
        assert_eq!(SyncError::Cancelled.failure_kind(), FailureKind::Network);
        assert_eq!(SyncError::Timeout.failure_kind(), FailureKind::Network);
        assert_eq!(
            SyncError::ServerError("500".into()).failure_kind(),
            FailureKind::Other
        );
    }

    #[test]
    fn network_failures() {
        assert!(SyncError::network("connection reset").is_network_failure());
        assert!(SyncError::Timeout.is_network_failure());
        assert!(!SyncError::Cancelled.is_network_failure());
        assert!(!SyncError::validation("x").is_network_failure());
    }

    #[test]
    fn retryable_errors() {
        assert!(SyncError::network("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::ServerError("internal error".into()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::CommitFailed { phase: "pull" };
        assert_eq!(err.to_string(), "failed to commit pull changes");

        let err = SyncError::Stalled { remaining: 3 };
        assert!(err.to_string().contains('3'));
    }
}
