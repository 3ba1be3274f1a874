//! Cache metrics for monitoring cache performance.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing cache behaviour.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Lookups answered from a ready (or same-transaction staged) entry.
    hits: AtomicU64,
    /// Lookups that had to run the computation.
    misses: AtomicU64,
    /// Lookups that waited for another caller's computation.
    waits: AtomicU64,
    /// Entries evicted to respect capacity.
    evictions: AtomicU64,
    /// Entries removed because a dependency was written.
    invalidations: AtomicU64,
    /// In-flight or staged computations discarded before publication.
    abandoned: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_wait(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invalidations(&self, count: usize) {
        self.invalidations.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_abandoned(&self, count: usize) {
        self.abandoned.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Get the number of cache hits.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get the number of cache misses.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get the number of waits on in-flight computations.
    #[must_use]
    pub fn waits(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }

    /// Get the number of capacity evictions.
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get the number of invalidated entries.
    #[must_use]
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Get the number of abandoned computations.
    #[must_use]
    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        for counter in
            [&self.hits, &self.misses, &self.waits, &self.evictions, &self.invalidations, &self.abandoned]
        {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Get a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            waits: self.waits(),
            evictions: self.evictions(),
            invalidations: self.invalidations(),
            abandoned: self.abandoned(),
        }
    }
}

/// A point-in-time snapshot of cache metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of waits on in-flight computations.
    pub waits: u64,
    /// Number of capacity evictions.
    pub evictions: u64,
    /// Number of invalidated entries.
    pub invalidations: u64,
    /// Number of abandoned computations.
    pub abandoned: u64,
}

impl MetricsSnapshot {
    /// Get the total number of lookups that did not wait.
    #[must_use]
    pub const fn total_lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Get the hit rate as a percentage.
    ///
    /// Returns `None` if there have been no lookups.
    #[must_use]
    pub fn hit_rate(&self) -> Option<f64> {
        let total = self.total_lookups();
        if total == 0 {
            None
        } else {
            Some((self.hits as f64 / total as f64) * 100.0)
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hit_rate =
            self.hit_rate().map(|r| format!("{r:.1}%")).unwrap_or_else(|| "N/A".to_string());
        write!(
            f,
            "Cache Stats: hits={}, misses={}, hit_rate={}, waits={}, evictions={}, invalidations={}, abandoned={}",
            self.hits,
            self.misses,
            hit_rate,
            self.waits,
            self.evictions,
            self.invalidations,
            self.abandoned
        )
    }
}
