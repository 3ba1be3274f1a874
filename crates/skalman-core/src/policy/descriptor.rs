//! Resolved per-method policy descriptors.

use serde::{Deserialize, Serialize};

use super::Backoff;
use crate::transaction::{AccessMode, Propagation};
use crate::types::MethodId;

/// Retry count used when a policy enables retry without naming a count.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Result-caching settings for a method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    /// Whether results are cached.
    pub enabled: bool,

    /// WRITE-mode methods whose committed side effects invalidate this
    /// method's cached results.
    pub depends_on: Vec<MethodId>,
}

/// Retry settings for a method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Whether retryable failures are retried.
    pub enabled: bool,

    /// Retries after the first attempt, so a call runs at most
    /// `max_retries + 1` times.
    pub max_retries: u32,

    /// Delay between attempts.
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { enabled: false, max_retries: DEFAULT_MAX_RETRIES, backoff: Backoff::None }
    }
}

impl RetryPolicy {
    /// A retry policy allowing `max_retries` retries without backoff.
    #[must_use]
    pub const fn attempts(max_retries: u32) -> Self {
        Self { enabled: true, max_retries, backoff: Backoff::None }
    }

    /// A disabled retry policy.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Maximum number of attempts (the first call plus retries).
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        if self.enabled {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }
}

/// What to do when a WRITE method would join a READ transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessConflictStrategy {
    /// Fail the call with an access-mode conflict.
    #[default]
    Reject,
    /// Run the call in a new, independent WRITE transaction.
    RequiresNew,
}

/// The effective transaction settings of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionPolicy {
    /// How the method participates in an ambient transaction.
    pub propagation: Propagation,
    /// Declared access mode, if any.
    pub access_mode: Option<AccessMode>,
    /// Behaviour when a WRITE method meets a READ transaction.
    pub on_access_conflict: AccessConflictStrategy,
}

impl TransactionPolicy {
    /// Access mode used when this policy begins a transaction.
    ///
    /// Methods without a declared access mode open read-write transactions.
    #[must_use]
    pub fn begin_mode(&self) -> AccessMode {
        self.access_mode.unwrap_or(AccessMode::Write)
    }
}

/// The resolved cache, transaction and retry policy of one method.
///
/// Descriptors are built once, registered with the policy registry and never
/// mutated afterwards.
///
/// # Example
///
/// ```
/// use skalman_core::{AccessMode, PolicyDescriptor, Propagation};
///
/// let policy = PolicyDescriptor::new()
///     .cacheable()
///     .propagation(Propagation::Required)
///     .access_mode(AccessMode::Write)
///     .retry(2);
///
/// assert!(policy.cache_enabled());
/// assert!(policy.retry_enabled());
/// assert_eq!(policy.max_retries(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDescriptor {
    /// Result caching.
    pub cache: CachePolicy,

    /// Transaction propagation; `None` when the method has no JTA marker.
    pub propagation: Option<Propagation>,

    /// Persistence access mode; `None` when the method has no
    /// entity-manager marker.
    pub access_mode: Option<AccessMode>,

    /// Behaviour when a WRITE method meets a READ transaction.
    pub on_access_conflict: AccessConflictStrategy,

    /// Retry on failure.
    pub retry: RetryPolicy,
}

impl PolicyDescriptor {
    /// Create a descriptor with every aspect disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable result caching.
    #[must_use]
    pub fn cacheable(mut self) -> Self {
        self.cache.enabled = true;
        self
    }

    /// Declare that cached results depend on the side effects of `method`.
    #[must_use]
    pub fn depends_on(mut self, method: impl Into<MethodId>) -> Self {
        self.cache.depends_on.push(method.into());
        self
    }

    /// Set the transaction propagation.
    #[must_use]
    pub const fn propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = Some(propagation);
        self
    }

    /// Set the persistence access mode.
    #[must_use]
    pub const fn access_mode(mut self, mode: AccessMode) -> Self {
        self.access_mode = Some(mode);
        self
    }

    /// Set the access-conflict strategy.
    #[must_use]
    pub const fn on_access_conflict(mut self, strategy: AccessConflictStrategy) -> Self {
        self.on_access_conflict = strategy;
        self
    }

    /// Enable retry with the given number of retries.
    #[must_use]
    pub fn retry(mut self, max_retries: u32) -> Self {
        self.retry.enabled = true;
        self.retry.max_retries = max_retries;
        self
    }

    /// Set the delay between retries.
    #[must_use]
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.retry.backoff = backoff;
        self
    }

    /// Returns `true` if results of this method are cached.
    #[must_use]
    pub const fn cache_enabled(&self) -> bool {
        self.cache.enabled
    }

    /// Returns `true` if retryable failures are retried.
    #[must_use]
    pub const fn retry_enabled(&self) -> bool {
        self.retry.enabled
    }

    /// Number of retries after the first attempt (0 when retry is disabled).
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        if self.retry.enabled {
            self.retry.max_retries
        } else {
            0
        }
    }

    /// Returns `true` if the method declares WRITE access.
    #[must_use]
    pub fn is_write(&self) -> bool {
        self.access_mode.is_some_and(AccessMode::is_write)
    }

    /// The effective transaction policy.
    ///
    /// A declared access mode without a propagation implies
    /// [`Propagation::Required`]. Returns `None` when the method is not
    /// transactional at all.
    #[must_use]
    pub fn transaction(&self) -> Option<TransactionPolicy> {
        let propagation = match (self.propagation, self.access_mode) {
            (Some(p), _) => p,
            (None, Some(_)) => Propagation::Required,
            (None, None) => return None,
        };
        Some(TransactionPolicy {
            propagation,
            access_mode: self.access_mode,
            on_access_conflict: self.on_access_conflict,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_inert() {
        let policy = PolicyDescriptor::new();
        assert!(!policy.cache_enabled());
        assert!(!policy.retry_enabled());
        assert_eq!(policy.max_retries(), 0);
        assert!(policy.transaction().is_none());
    }

    #[test]
    fn test_access_mode_implies_required() {
        let policy = PolicyDescriptor::new().access_mode(AccessMode::Read);
        let tx = policy.transaction().expect("transactional");
        assert_eq!(tx.propagation, Propagation::Required);
        assert_eq!(tx.begin_mode(), AccessMode::Read);
    }

    #[test]
    fn test_undeclared_access_begins_write() {
        let policy = PolicyDescriptor::new().propagation(Propagation::RequiresNew);
        let tx = policy.transaction().expect("transactional");
        assert_eq!(tx.access_mode, None);
        assert_eq!(tx.begin_mode(), AccessMode::Write);
    }

    #[test]
    fn test_max_attempts() {
        assert_eq!(RetryPolicy::attempts(2).max_attempts(), 3);
        assert_eq!(RetryPolicy::disabled().max_attempts(), 1);
        assert_eq!(RetryPolicy::attempts(u32::MAX).max_attempts(), u32::MAX);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{
            "cache": { "enabled": true, "depends_on": ["accounts::update"] },
            "propagation": "supports",
            "access_mode": "read",
            "retry": { "enabled": true }
        }"#;
        let policy: PolicyDescriptor = serde_json::from_str(json).expect("deserialize");
        assert!(policy.cache_enabled());
        assert_eq!(policy.cache.depends_on, vec![MethodId::new("accounts::update")]);
        assert_eq!(policy.propagation, Some(Propagation::Supports));
        assert_eq!(policy.max_retries(), DEFAULT_MAX_RETRIES);
        assert_eq!(policy.retry.backoff, Backoff::None);
        assert_eq!(policy.on_access_conflict, AccessConflictStrategy::Reject);
    }
}
