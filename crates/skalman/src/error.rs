//! Error types for `Skalman`.
//!
//! This module provides the [`enum@Error`] type returned by every intercepted
//! call. Errors are `Clone` because a single failure of an in-flight cached
//! computation is delivered to every caller waiting on it.

use std::time::Duration;

use skalman_core::{AccessMode, CoreError, MethodId, TransactionId};
use skalman_resource::ResourceError;
use thiserror::Error;

/// Errors that can occur while dispatching an intercepted call.
///
/// [`Error::is_retryable`] is the single place that decides whether the retry
/// executor may run a call again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// No policy is registered for the method.
    #[error("no policy registered for method '{0}'")]
    UnresolvedPolicy(MethodId),

    /// Policies could not be loaded or failed validation.
    #[error("policy load error: {0}")]
    PolicyLoad(String),

    /// The method requires an ambient transaction and none is active.
    #[error("method '{method}' requires an active transaction")]
    NoTransactionContext {
        /// The method that was called.
        method: MethodId,
    },

    /// The method must not run inside a transaction but one is active.
    #[error("method '{method}' must not run inside a transaction, but {tx} is active")]
    TransactionContextPresent {
        /// The method that was called.
        method: MethodId,
        /// The active transaction.
        tx: TransactionId,
    },

    /// The requested access mode is not allowed in the current transaction.
    #[error("access mode conflict in '{method}': {requested} requested where only {allowed} is allowed")]
    AccessModeConflict {
        /// The method that was called.
        method: MethodId,
        /// Access the method asked for.
        requested: AccessMode,
        /// Access the transaction or method declaration permits.
        allowed: AccessMode,
    },

    /// The resource manager failed.
    #[error("resource manager error: {0}")]
    ResourceManager(#[from] ResourceError),

    /// Every permitted attempt failed.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error of the final attempt.
        last_error: Box<Error>,
    },

    /// The call chain was cancelled.
    #[error("invocation cancelled")]
    Cancelled,

    /// The transaction was marked rollback-only and has been rolled back
    /// instead of committed.
    #[error("transaction {tx} was marked rollback-only and has been rolled back")]
    RollbackOnly {
        /// The rolled-back transaction.
        tx: TransactionId,
        /// The failure that marked the transaction, if one was recorded.
        cause: Option<Box<Error>>,
    },

    /// Waiting for another caller's computation of the same cache key took
    /// too long.
    #[error("timed out after {waited:?} waiting for in-flight computation of {key}")]
    CacheWaitTimeout {
        /// The cache key being computed.
        key: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The target reported a transient failure.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The target reported a permanent failure.
    #[error("invocation failed: {0}")]
    Failed(String),

    /// An internal lock was poisoned (a thread panicked while holding it).
    #[error("internal lock poisoned: {0}")]
    LockPoisoned(String),

    /// A configuration error occurred.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns `true` if the call may succeed when run again.
    ///
    /// Resource-manager failures follow [`ResourceError::is_retryable`], a
    /// rollback-only transaction follows its recorded cause, and target
    /// transient failures and cache wait timeouts are retryable. Everything
    /// else (policy, propagation and access-mode violations, cancellation,
    /// exhausted retries) is fatal.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ResourceManager(err) => err.is_retryable(),
            Self::RollbackOnly { cause, .. } => cause.as_deref().is_some_and(Self::is_retryable),
            Self::Transient(_) | Self::CacheWaitTimeout { .. } => true,
            Self::UnresolvedPolicy(_)
            | Self::PolicyLoad(_)
            | Self::NoTransactionContext { .. }
            | Self::TransactionContextPresent { .. }
            | Self::AccessModeConflict { .. }
            | Self::RetriesExhausted { .. }
            | Self::Cancelled
            | Self::Failed(_)
            | Self::LockPoisoned(_)
            | Self::Config(_) => false,
        }
    }

    /// Returns `true` if this error came from the resource manager.
    #[must_use]
    pub const fn is_resource_error(&self) -> bool {
        matches!(self, Self::ResourceManager(_))
    }

    /// The underlying failure, looking through [`Error::RetriesExhausted`]
    /// and [`Error::RollbackOnly`] wrappers.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::RetriesExhausted { last_error, .. } => last_error.root_cause(),
            Self::RollbackOnly { cause: Some(cause), .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Create a transient (retryable) target failure.
    #[must_use]
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a permanent target failure.
    #[must_use]
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Create a policy load error.
    #[must_use]
    pub fn policy_load(msg: impl Into<String>) -> Self {
        Self::PolicyLoad(msg.into())
    }

    /// Create a config error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a lock poisoned error.
    #[must_use]
    pub fn lock_poisoned(msg: impl Into<String>) -> Self {
        Self::LockPoisoned(msg.into())
    }
}

impl From<CoreError> for Error {
    fn from(err: CoreError) -> Self {
        Self::PolicyLoad(err.to_string())
    }
}

/// A specialized `Result` type for `Skalman` operations.
pub type Result<T> = std::result::Result<T, Error>;
