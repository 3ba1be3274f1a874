//! Dispatcher configuration.

use std::time::Duration;

use crate::cache::CacheConfig;
use crate::error::{Error, Result};

/// Configuration for a [`Dispatcher`](crate::Dispatcher).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use skalman::{CacheConfig, DispatcherConfig};
///
/// let config = DispatcherConfig::new()
///     .cache(CacheConfig::new().max_entries(10_000))
///     .pending_wait_timeout(Duration::from_secs(5));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Result cache settings.
    pub cache: CacheConfig,

    /// Upper bound on how long a caller waits for another caller's in-flight
    /// computation of the same cache key.
    /// Default: 30 seconds
    pub pending_wait_timeout: Duration,

    /// How often blocked cache waits re-check the cancellation signal. A
    /// waiter whose chain is cancelled returns within one interval.
    /// Default: 10 milliseconds
    pub cancellation_poll_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            pending_wait_timeout: Duration::from_secs(30),
            cancellation_poll_interval: Duration::from_millis(10),
        }
    }
}

impl DispatcherConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache configuration.
    #[must_use]
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Set the pending wait timeout.
    #[must_use]
    pub const fn pending_wait_timeout(mut self, timeout: Duration) -> Self {
        self.pending_wait_timeout = timeout;
        self
    }

    /// Set the cancellation poll interval.
    #[must_use]
    pub const fn cancellation_poll_interval(mut self, interval: Duration) -> Self {
        self.cancellation_poll_interval = interval;
        self
    }

    /// Check the configuration for values the runtime cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a wait timeout or poll interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.pending_wait_timeout.is_zero() {
            return Err(Error::config("pending_wait_timeout must be greater than zero"));
        }
        if self.cancellation_poll_interval.is_zero() {
            return Err(Error::config("cancellation_poll_interval must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DispatcherConfig::default();
        assert!(config.cache.enabled);
        assert_eq!(config.pending_wait_timeout, Duration::from_secs(30));
        config.validate().expect("default config is valid");
    }

    #[test]
    fn test_zero_durations_rejected() {
        let config = DispatcherConfig::new().pending_wait_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = DispatcherConfig::new().cancellation_poll_interval(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
