//! Resource manager error types.

use skalman_core::TransactionId;
use thiserror::Error;

use super::ResourceOp;

/// Errors reported by a resource manager.
///
/// Resource failures are transient by default: the runtime retries them when
/// the intercepted method's policy allows it. Only protocol violations, where
/// the runtime asked for an impossible state transition, are permanent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// The resource could not be reached or acquired.
    #[error("resource unavailable during {op}: {message}")]
    Unavailable {
        /// The operation that failed.
        op: ResourceOp,
        /// Backend-specific detail.
        message: String,
    },

    /// The resource rejected the operation because of concurrent activity.
    #[error("resource contention during {op}: {message}")]
    Contention {
        /// The operation that failed.
        op: ResourceOp,
        /// Backend-specific detail.
        message: String,
    },

    /// The transaction is not known to the resource manager.
    #[error("unknown transaction: {0}")]
    UnknownTransaction(TransactionId),

    /// The operation is not valid in the transaction's current state.
    #[error("invalid state for {op} on {id}: {message}")]
    InvalidState {
        /// The operation that was attempted.
        op: ResourceOp,
        /// The transaction involved.
        id: TransactionId,
        /// Description of the current state.
        message: String,
    },

    /// Any other backend failure.
    #[error("resource manager error: {0}")]
    Other(String),
}

impl ResourceError {
    /// Returns `true` if the operation may succeed when the call is retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::UnknownTransaction(_) | Self::InvalidState { .. })
    }

    /// Create an unavailability error.
    #[must_use]
    pub fn unavailable(op: ResourceOp, message: impl Into<String>) -> Self {
        Self::Unavailable { op, message: message.into() }
    }

    /// Create a contention error.
    #[must_use]
    pub fn contention(op: ResourceOp, message: impl Into<String>) -> Self {
        Self::Contention { op, message: message.into() }
    }

    /// Create an invalid-state error.
    #[must_use]
    pub fn invalid_state(op: ResourceOp, id: TransactionId, message: impl Into<String>) -> Self {
        Self::InvalidState { op, id, message: message.into() }
    }
}

/// Result type alias for resource manager operations.
pub type ResourceResult<T> = Result<T, ResourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ResourceError::unavailable(ResourceOp::Begin, "pool exhausted").is_retryable());
        assert!(ResourceError::contention(ResourceOp::Commit, "deadlock").is_retryable());
        assert!(ResourceError::Other("boom".into()).is_retryable());
        assert!(!ResourceError::UnknownTransaction(TransactionId::new(1)).is_retryable());
        assert!(!ResourceError::invalid_state(ResourceOp::Resume, TransactionId::new(1), "active")
            .is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ResourceError::unavailable(ResourceOp::Begin, "pool exhausted");
        assert_eq!(err.to_string(), "resource unavailable during begin: pool exhausted");
    }
}
