//! Result cache store implementation.
//!
//! Provides a single-flight LRU cache for method results with configurable
//! size and TTL, dependency-driven invalidation and transaction-aware
//! publication.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use skalman_core::{MethodId, TransactionId, Value};
use tracing::{trace, warn};

use super::flight::{Flight, WaitOutcome};
use super::{CacheKey, CacheMetrics};
use crate::context::{ChainId, InvocationContext};
use crate::error::{Error, Result};
use crate::registry::PolicyRegistry;
use crate::transaction::{TransactionEffect, TransactionEffects, TransactionObserver};

/// Configuration for the result cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of ready entries in the cache.
    /// Default: 1000
    pub max_entries: usize,

    /// Time-to-live for ready entries.
    /// If `None`, entries never expire based on time.
    /// Default: 5 minutes
    pub ttl: Option<Duration>,

    /// Whether to enable the cache.
    /// Default: true
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 1000, ttl: Some(Duration::from_secs(300)), enabled: true }
    }
}

impl CacheConfig {
    /// Create a new cache configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of entries.
    #[must_use]
    pub const fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Set the TTL for cache entries.
    #[must_use]
    pub const fn ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Enable or disable the cache.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Create a configuration for a disabled cache.
    #[must_use]
    pub fn disabled() -> Self {
        Self { enabled: false, ..Default::default() }
    }
}

/// Invalidation epoch of a method, captured when a computation starts.
/// A result is only stored if the epoch is unchanged when it finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EpochStamp {
    generation: u64,
    method: u64,
}

#[derive(Debug)]
struct ReadyEntry {
    value: Value,
    created_at: Instant,
}

impl ReadyEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

#[derive(Debug)]
struct StagedValue {
    tx: TransactionId,
    value: Value,
}

#[derive(Debug)]
struct PendingEntry {
    flight: Arc<Flight>,
    chain: ChainId,
    stamp: EpochStamp,
    staged: Option<StagedValue>,
}

#[derive(Debug)]
enum Slot {
    Ready(ReadyEntry),
    Pending(PendingEntry),
}

/// Internal cache state.
#[derive(Debug, Default)]
struct CacheState {
    /// Map from cache key to entry.
    slots: HashMap<CacheKey, Slot>,
    /// Ready keys for LRU eviction (oldest first). Pending keys are never
    /// listed, so they are never evicted.
    lru_order: VecDeque<CacheKey>,
    /// Per-method invalidation counters.
    epochs: HashMap<MethodId, u64>,
    /// Bumped by `clear`.
    generation: u64,
}

impl CacheState {
    fn stamp(&self, method: &MethodId) -> EpochStamp {
        EpochStamp {
            generation: self.generation,
            method: self.epochs.get(method).copied().unwrap_or(0),
        }
    }

    fn touch(&mut self, key: &CacheKey) {
        if let Some(pos) = self.lru_order.iter().position(|k| k == key) {
            if let Some(k) = self.lru_order.remove(pos) {
                self.lru_order.push_back(k);
            }
        }
    }

    fn remove_ready(&mut self, key: &CacheKey) {
        if matches!(self.slots.get(key), Some(Slot::Ready(_))) {
            self.slots.remove(key);
            self.lru_order.retain(|k| k != key);
        }
    }

    /// Remove the pending slot of `key` if it still belongs to `flight`.
    fn remove_flight(&mut self, key: &CacheKey, flight: &Arc<Flight>) -> Option<PendingEntry> {
        match self.slots.get(key) {
            Some(Slot::Pending(p)) if Arc::ptr_eq(&p.flight, flight) => match self.slots.remove(key) {
                Some(Slot::Pending(p)) => Some(p),
                _ => None,
            },
            _ => None,
        }
    }

    /// Bump the method's epoch and drop its ready entries.
    fn invalidate_method(&mut self, method: &MethodId) -> usize {
        *self.epochs.entry(method.clone()).or_insert(0) += 1;
        let before = self.lru_order.len();
        self.lru_order.retain(|k| k.method() != method);
        let removed = before - self.lru_order.len();
        if removed > 0 {
            self.slots.retain(|k, slot| !(k.method() == method && matches!(slot, Slot::Ready(_))));
        }
        removed
    }
}

enum Lookup {
    Hit(Value),
    Bypass,
    Wait(Arc<Flight>),
    Lead(Arc<Flight>, EpochStamp),
}

/// Thread-safe single-flight result cache with LRU eviction.
///
/// # Entry Lifecycle
///
/// ```text
///   absent ──lead──▶ PENDING ──success──▶ READY ──invalidate/evict/expire──▶ absent
///                       │  └──staged (ambient WRITE tx)──▶ commit ──▶ READY
///                       │                                  rollback ─▶ absent
///                       └──failure──▶ absent
/// ```
///
/// - At most one caller computes a key at a time; the others wait on the
///   entry's flight and all receive the same value or the same error.
/// - Failures are never stored.
/// - A result computed while joined to an ambient WRITE transaction is staged
///   against that transaction: visible to it immediately, to everyone else
///   only after it commits, and discarded if it rolls back.
/// - A computation that started before an invalidation of its method is
///   never stored (its callers still receive the value).
/// - Eviction only ever removes READY entries.
pub struct CacheStore {
    /// Cache configuration.
    config: CacheConfig,
    /// Source of dependency information for invalidation.
    registry: PolicyRegistry,
    /// Bound on waits for another caller's computation.
    wait_timeout: Duration,
    /// Cancellation re-check interval while waiting.
    poll_interval: Duration,
    /// Cache state; computations never run while it is held.
    state: Mutex<CacheState>,
    /// Cache metrics.
    metrics: Arc<CacheMetrics>,
}

impl CacheStore {
    /// Default bound on waits for an in-flight computation.
    pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Default cancellation re-check interval.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

    /// Create a new cache store.
    ///
    /// `registry` supplies the dependency declarations that drive
    /// invalidation.
    #[must_use]
    pub fn new(config: CacheConfig, registry: PolicyRegistry) -> Self {
        Self {
            config,
            registry,
            wait_timeout: Self::DEFAULT_WAIT_TIMEOUT,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            state: Mutex::new(CacheState::default()),
            metrics: Arc::new(CacheMetrics::new()),
        }
    }

    /// Create a disabled cache store.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(CacheConfig::disabled(), PolicyRegistry::default())
    }

    /// Set the wait bound and cancellation poll interval.
    #[must_use]
    pub const fn with_wait_limits(mut self, timeout: Duration, poll: Duration) -> Self {
        self.wait_timeout = timeout;
        self.poll_interval = poll;
        self
    }

    /// Get the cache configuration.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get the cache metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<CacheMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Check if the cache is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Return the cached value of `key`, or compute it.
    ///
    /// `stage` says the computation joins the chain's ambient transaction;
    /// if that transaction is WRITE, the result is staged until it commits.
    ///
    /// # Errors
    ///
    /// Returns the computation's error (shared by every waiter),
    /// [`Error::CacheWaitTimeout`] if another caller's computation takes too
    /// long, or [`Error::Cancelled`] if the chain is cancelled while waiting.
    pub fn get_or_compute<F>(
        &self,
        ctx: &mut InvocationContext,
        key: &CacheKey,
        stage: bool,
        mut compute: F,
    ) -> Result<Value>
    where
        F: FnMut(&mut InvocationContext) -> Result<Value>,
    {
        if !self.config.enabled {
            return compute(ctx);
        }

        loop {
            match self.lookup(key, ctx)? {
                Lookup::Hit(value) => {
                    trace!(%key, "cache hit");
                    return Ok(value);
                }
                Lookup::Bypass => {
                    trace!(%key, chain = %ctx.chain_id(), "key in flight on this chain, computing uncached");
                    return compute(ctx);
                }
                Lookup::Wait(flight) => {
                    self.metrics.record_wait();
                    trace!(%key, "waiting for in-flight computation");
                    match flight.wait(self.wait_timeout, self.poll_interval, ctx.token())? {
                        WaitOutcome::Resolved(result) => return result,
                        WaitOutcome::Abandoned => {
                            trace!(%key, "in-flight computation abandoned, looking up again");
                        }
                        WaitOutcome::TimedOut => {
                            return Err(Error::CacheWaitTimeout {
                                key: key.to_string(),
                                waited: self.wait_timeout,
                            });
                        }
                        WaitOutcome::Cancelled => return Err(Error::Cancelled),
                    }
                }
                Lookup::Lead(flight, stamp) => {
                    return self.lead(ctx, key, &flight, stamp, stage, &mut compute);
                }
            }
        }
    }

    /// Invalidate every ready entry of `method` and prevent in-flight
    /// computations of it from being stored.
    pub fn invalidate_method(&self, method: &str) {
        let method = MethodId::new(method);
        if let Ok(mut state) = self.state.lock() {
            let count = state.invalidate_method(&method);
            self.metrics.record_invalidations(count);
        }
    }

    /// Invalidate the entries of every method that depends on `method`.
    pub fn invalidate_dependents_of(&self, method: &str) {
        if let Ok(mut state) = self.state.lock() {
            let mut count = 0;
            for dependent in self.registry.dependents_of(method) {
                count += state.invalidate_method(dependent);
            }
            self.metrics.record_invalidations(count);
        }
    }

    /// Clear all ready entries. In-flight computations finish but are not
    /// stored.
    pub fn clear(&self) {
        if let Ok(mut state) = self.state.lock() {
            let count = state.lru_order.len();
            state.generation += 1;
            let CacheState { slots, lru_order, .. } = &mut *state;
            for key in lru_order.drain(..) {
                slots.remove(&key);
            }
            self.metrics.record_invalidations(count);
        }
    }

    /// Returns `true` if a ready entry exists for `key`.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().map(|s| matches!(s.slots.get(key), Some(Slot::Ready(_)))).unwrap_or(false)
    }

    /// Get the current number of ready entries in the cache.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.lru_order.len()).unwrap_or(0)
    }

    /// Check if the cache holds no ready entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries being computed or staged.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().map(|s| s.slots.len() - s.lru_order.len()).unwrap_or(0)
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, CacheState>> {
        self.state.lock().map_err(|e| Error::lock_poisoned(format!("cache state: {e}")))
    }

    fn lookup(&self, key: &CacheKey, ctx: &InvocationContext) -> Result<Lookup> {
        let mut state = self.lock_state()?;

        let expired = match (self.config.ttl, state.slots.get(key)) {
            (Some(ttl), Some(Slot::Ready(entry))) => entry.is_expired(ttl),
            _ => false,
        };
        if expired {
            state.remove_ready(key);
        }

        match state.slots.get(key) {
            Some(Slot::Ready(entry)) => {
                let value = entry.value.clone();
                state.touch(key);
                self.metrics.record_hit();
                return Ok(Lookup::Hit(value));
            }
            Some(Slot::Pending(pending)) => {
                if let Some(staged) = &pending.staged {
                    if Some(staged.tx) == ctx.current_id() {
                        self.metrics.record_hit();
                        return Ok(Lookup::Hit(staged.value.clone()));
                    }
                }
                // Waiting on our own chain would never finish.
                if pending.chain == ctx.chain_id() {
                    self.metrics.record_miss();
                    return Ok(Lookup::Bypass);
                }
                return Ok(Lookup::Wait(Arc::clone(&pending.flight)));
            }
            None => {}
        }

        self.metrics.record_miss();
        let flight = Flight::new();
        let stamp = state.stamp(key.method());
        state.slots.insert(
            key.clone(),
            Slot::Pending(PendingEntry {
                flight: Arc::clone(&flight),
                chain: ctx.chain_id(),
                stamp,
                staged: None,
            }),
        );
        Ok(Lookup::Lead(flight, stamp))
    }

    fn lead<F>(
        &self,
        ctx: &mut InvocationContext,
        key: &CacheKey,
        flight: &Arc<Flight>,
        stamp: EpochStamp,
        stage: bool,
        compute: &mut F,
    ) -> Result<Value>
    where
        F: FnMut(&mut InvocationContext) -> Result<Value>,
    {
        let effects_before = ctx.current().map_or(0, |h| h.effects().len());
        let mut guard = LeaderGuard { store: self, key, flight, armed: true };
        let result = compute(ctx);
        guard.armed = false;

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                self.discard(key, flight);
                flight.resolve(Err(err.clone()));
                return Err(err);
            }
        };

        let staging_tx = ctx.current().filter(|h| stage && h.mode().is_write()).map(|h| {
            let during = h.effects().get(effects_before..).unwrap_or_default();
            (h.id(), self.wrote_dependency(key, during))
        });

        match staging_tx {
            None => self.publish(key, flight, stamp, value.clone()),
            Some((_, true)) => {
                // The transaction wrote something this result depends on
                // while computing it; nothing consistent can be shared.
                self.discard(key, flight);
                self.metrics.record_abandoned(1);
                flight.abandon();
            }
            Some((tx, false)) => {
                if self.stage(key, flight, tx, value.clone()) {
                    ctx.record_effect(TransactionEffect::Staged(key.clone()));
                    trace!(%key, tx_id = %tx, "staged result until commit");
                }
            }
        }
        Ok(value)
    }

    fn wrote_dependency(&self, key: &CacheKey, effects: &[TransactionEffect]) -> bool {
        effects.iter().any(|effect| match effect {
            TransactionEffect::Wrote(method) => {
                self.registry.dependents_of(method.as_str()).contains(key.method())
            }
            TransactionEffect::Staged(_) => false,
        })
    }

    fn publish(&self, key: &CacheKey, flight: &Arc<Flight>, stamp: EpochStamp, value: Value) {
        match self.state.lock() {
            Ok(mut state) => {
                if state.remove_flight(key, flight).is_some() {
                    if state.stamp(key.method()) == stamp {
                        self.insert_ready(&mut state, key.clone(), value.clone());
                    } else {
                        trace!(%key, "method invalidated during computation, result not stored");
                    }
                }
            }
            Err(e) => warn!(%key, error = %e, "cache state poisoned, result not stored"),
        }
        flight.resolve(Ok(value));
    }

    fn stage(&self, key: &CacheKey, flight: &Arc<Flight>, tx: TransactionId, value: Value) -> bool {
        let Ok(mut state) = self.state.lock() else {
            flight.abandon();
            return false;
        };
        match state.slots.get_mut(key) {
            Some(Slot::Pending(pending)) if Arc::ptr_eq(&pending.flight, flight) => {
                pending.staged = Some(StagedValue { tx, value });
                true
            }
            _ => {
                drop(state);
                flight.abandon();
                false
            }
        }
    }

    fn discard(&self, key: &CacheKey, flight: &Arc<Flight>) {
        if let Ok(mut state) = self.state.lock() {
            state.remove_flight(key, flight);
        }
    }

    fn insert_ready(&self, state: &mut CacheState, key: CacheKey, value: Value) {
        if self.config.max_entries == 0 {
            return;
        }
        while state.lru_order.len() >= self.config.max_entries {
            let Some(oldest) = state.lru_order.pop_front() else { break };
            state.slots.remove(&oldest);
            self.metrics.record_eviction();
        }
        state.slots.insert(key.clone(), Slot::Ready(ReadyEntry { value, created_at: Instant::now() }));
        state.lru_order.push_back(key);
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(CacheConfig::default(), PolicyRegistry::default())
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("config", &self.config)
            .field("len", &self.len())
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}

impl TransactionObserver for CacheStore {
    fn committed(&self, effects: &TransactionEffects) {
        let mut published = Vec::new();
        let mut dropped = Vec::new();
        let mut invalidated = 0;
        {
            let Ok(mut guard) = self.state.lock() else {
                warn!(tx_id = ?effects.tx, "cache state poisoned, commit effects lost");
                return;
            };
            let state = &mut *guard;

            // Judge staged results before this commit's own invalidations
            // move the epochs.
            let mut verdicts = Vec::new();
            if let Some(tx) = effects.tx {
                for (i, effect) in effects.log.iter().enumerate() {
                    let TransactionEffect::Staged(key) = effect else { continue };
                    let Some(Slot::Pending(pending)) = state.slots.get(key) else { continue };
                    if pending.staged.as_ref().map(|s| s.tx) != Some(tx) {
                        continue;
                    }
                    let fresh = state.stamp(key.method()) == pending.stamp
                        && !self.wrote_dependency(key, &effects.log[i + 1..]);
                    verdicts.push((key, fresh));
                }
            }

            for method in effects.written_methods() {
                for dependent in self.registry.dependents_of(method.as_str()) {
                    invalidated += state.invalidate_method(dependent);
                }
            }

            for (key, fresh) in verdicts {
                let Some(Slot::Pending(pending)) = state.slots.remove(key) else { continue };
                match pending.staged {
                    Some(staged) if fresh => {
                        self.insert_ready(state, key.clone(), staged.value.clone());
                        published.push((pending.flight, staged.value));
                    }
                    _ => dropped.push(pending.flight),
                }
            }
        }

        if invalidated > 0 {
            trace!(tx_id = ?effects.tx, invalidated, "invalidated dependent entries");
        }
        self.metrics.record_invalidations(invalidated);
        self.metrics.record_abandoned(dropped.len());
        for (flight, value) in published {
            flight.resolve(Ok(value));
        }
        for flight in dropped {
            flight.abandon();
        }
    }

    fn rolled_back(&self, effects: &TransactionEffects) {
        let Some(tx) = effects.tx else { return };
        let mut dropped = Vec::new();
        if let Ok(mut state) = self.state.lock() {
            for effect in &effects.log {
                let TransactionEffect::Staged(key) = effect else { continue };
                let staged_here = matches!(
                    state.slots.get(key),
                    Some(Slot::Pending(PendingEntry { staged: Some(StagedValue { tx: t, .. }), .. })) if *t == tx
                );
                if staged_here {
                    if let Some(Slot::Pending(pending)) = state.slots.remove(key) {
                        dropped.push(pending.flight);
                    }
                }
            }
        }
        if !dropped.is_empty() {
            trace!(tx_id = %tx, discarded = dropped.len(), "discarded staged results");
        }
        self.metrics.record_abandoned(dropped.len());
        for flight in dropped {
            flight.abandon();
        }
    }
}

/// Abandons the leader's flight if the computation unwinds.
struct LeaderGuard<'a> {
    store: &'a CacheStore,
    key: &'a CacheKey,
    flight: &'a Arc<Flight>,
    armed: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.store.discard(self.key, self.flight);
            self.store.metrics.record_abandoned(1);
            self.flight.abandon();
        }
    }
}
