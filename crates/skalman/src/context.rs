//! Per-chain invocation context and cancellation.
//!
//! One [`InvocationContext`] exists per call chain. It is created when a call
//! enters the runtime from outside any intercepted method and is passed by
//! mutable reference down every nested intercepted call, so it never crosses
//! threads. The only part of it another thread may touch is the
//! [`CancellationToken`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use skalman_core::TransactionId;

use crate::error::{Error, Result};
use crate::transaction::{TransactionEffect, TransactionHandle};

static NEXT_CHAIN_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one call chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(u64);

impl ChainId {
    /// Allocate a process-unique chain id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CHAIN_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct TokenState {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

/// A cloneable cancellation signal for one call chain.
///
/// Cancelling is sticky. Sleeps performed through the token wake up as soon
/// as it is cancelled.
///
/// # Example
///
/// ```
/// use skalman::CancellationToken;
///
/// let token = CancellationToken::new();
/// let remote = token.clone();
/// assert!(token.check().is_ok());
///
/// remote.cancel();
/// assert!(token.is_cancelled());
/// assert!(token.check().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    /// Create a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the chain and wake any sleeper.
    pub fn cancel(&self) {
        if let Ok(mut cancelled) = self.state.cancelled.lock() {
            *cancelled = true;
        }
        self.state.signal.notify_all();
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        // A poisoned flag can only come from a panicking canceller.
        self.state.cancelled.lock().map_or(true, |c| *c)
    }

    /// Fail with [`Error::Cancelled`] if the chain was cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] after cancellation.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, returning early if the chain is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the chain is or becomes cancelled.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        let mut cancelled =
            self.state.cancelled.lock().map_err(|e| Error::lock_poisoned(e.to_string()))?;
        loop {
            if *cancelled {
                return Err(Error::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            cancelled = self
                .state
                .signal
                .wait_timeout(cancelled, deadline - now)
                .map_err(|e| Error::lock_poisoned(e.to_string()))?
                .0;
        }
    }
}

/// State carried along one call chain.
///
/// Holds the current transaction, the stack of transactions suspended by
/// `REQUIRES_NEW` and `NOT_SUPPORTED` calls, the call depth and the chain's
/// cancellation token. At most one transaction is current at any time.
#[derive(Debug)]
pub struct InvocationContext {
    chain: ChainId,
    depth: u32,
    current: Option<TransactionHandle>,
    suspended: Vec<TransactionHandle>,
    token: CancellationToken,
}

impl InvocationContext {
    /// Create the context of a new call chain.
    #[must_use]
    pub fn new(token: CancellationToken) -> Self {
        Self { chain: ChainId::next(), depth: 0, current: None, suspended: Vec::new(), token }
    }

    /// The chain this context belongs to.
    #[must_use]
    pub const fn chain_id(&self) -> ChainId {
        self.chain
    }

    /// Nesting depth of the intercepted call currently running (0 for the
    /// outermost call).
    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    /// The current transaction, if any.
    #[must_use]
    pub const fn current(&self) -> Option<&TransactionHandle> {
        self.current.as_ref()
    }

    /// Id of the current transaction, if any.
    #[must_use]
    pub fn current_id(&self) -> Option<TransactionId> {
        self.current.as_ref().map(TransactionHandle::id)
    }

    /// Returns `true` if a transaction is current.
    #[must_use]
    pub const fn has_transaction(&self) -> bool {
        self.current.is_some()
    }

    /// Number of suspended transactions.
    #[must_use]
    pub fn suspended_count(&self) -> usize {
        self.suspended.len()
    }

    /// The chain's cancellation token.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns `true` if the chain was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn enter(&mut self) {
        self.depth = self.depth.saturating_add(1);
    }

    pub(crate) fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub(crate) fn current_mut(&mut self) -> Option<&mut TransactionHandle> {
        self.current.as_mut()
    }

    pub(crate) fn install(&mut self, handle: TransactionHandle) {
        debug_assert!(self.current.is_none(), "a transaction is already current");
        self.current = Some(handle);
    }

    pub(crate) fn take_current(&mut self) -> Option<TransactionHandle> {
        self.current.take()
    }

    pub(crate) fn push_suspended(&mut self, handle: TransactionHandle) {
        self.suspended.push(handle);
    }

    pub(crate) fn pop_suspended(&mut self) -> Option<TransactionHandle> {
        self.suspended.pop()
    }

    /// Record an effect on the current transaction. Returns `false` when no
    /// transaction is current.
    pub(crate) fn record_effect(&mut self, effect: TransactionEffect) -> bool {
        match self.current.as_mut() {
            Some(handle) => {
                handle.record(effect);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_chain_ids_are_unique() {
        let a = InvocationContext::new(CancellationToken::new());
        let b = InvocationContext::new(CancellationToken::new());
        assert_ne!(a.chain_id(), b.chain_id());
        assert_eq!(a.depth(), 0);
        assert!(!a.has_transaction());
    }

    #[test]
    fn test_depth_tracking() {
        let mut ctx = InvocationContext::new(CancellationToken::new());
        ctx.enter();
        ctx.enter();
        assert_eq!(ctx.depth(), 2);
        ctx.exit();
        assert_eq!(ctx.depth(), 1);
    }

    #[test]
    fn test_sleep_completes() {
        let token = CancellationToken::new();
        let start = Instant::now();
        token.sleep(Duration::from_millis(15)).expect("not cancelled");
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_sleep_wakes_on_cancel() {
        let token = CancellationToken::new();
        let remote = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let start = Instant::now();
        let result = token.sleep(Duration::from_secs(10));
        canceller.join().expect("canceller panicked");

        assert_eq!(result, Err(Error::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
