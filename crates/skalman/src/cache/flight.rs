//! Single-flight completion cells.
//!
//! Every pending cache entry owns one [`Flight`]. The caller computing the
//! entry resolves it; every other caller blocks on it until it resolves, is
//! abandoned, times out or the waiter's chain is cancelled.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use skalman_core::Value;

use crate::context::CancellationToken;
use crate::error::{Error, Result};

#[derive(Debug)]
enum FlightState {
    Pending,
    Resolved(Result<Value>),
    Abandoned,
}

/// How a wait on a [`Flight`] ended.
#[derive(Debug)]
pub(crate) enum WaitOutcome {
    /// The computation finished; every waiter sees the same result.
    Resolved(Result<Value>),
    /// The computation was discarded without a shareable result.
    Abandoned,
    /// The wait exceeded its bound.
    TimedOut,
    /// The waiting chain was cancelled.
    Cancelled,
}

#[derive(Debug)]
pub(crate) struct Flight {
    state: Mutex<FlightState>,
    changed: Condvar,
}

impl Flight {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(FlightState::Pending), changed: Condvar::new() })
    }

    /// Publish the result. Only the first resolution or abandonment counts.
    pub(crate) fn resolve(&self, result: Result<Value>) {
        self.finish(FlightState::Resolved(result));
    }

    /// Release waiters without a result; they look the key up again.
    pub(crate) fn abandon(&self) {
        self.finish(FlightState::Abandoned);
    }

    fn finish(&self, outcome: FlightState) {
        // Waiters re-check on their poll interval if the lock is poisoned.
        if let Ok(mut state) = self.state.lock() {
            if matches!(*state, FlightState::Pending) {
                *state = outcome;
            }
        }
        self.changed.notify_all();
    }

    /// Block until the flight finishes, `timeout` elapses or `token` is
    /// cancelled.
    ///
    /// Resolution wakes waiters at once. Cancellation is only re-checked
    /// every `poll`, so `poll` is the latency of a cancelled wait.
    pub(crate) fn wait(
        &self,
        timeout: Duration,
        poll: Duration,
        token: &CancellationToken,
    ) -> Result<WaitOutcome> {
        let deadline = Instant::now() + timeout;
        let mut state =
            self.state.lock().map_err(|e| Error::lock_poisoned(format!("flight state: {e}")))?;
        loop {
            match &*state {
                FlightState::Resolved(result) => return Ok(WaitOutcome::Resolved(result.clone())),
                FlightState::Abandoned => return Ok(WaitOutcome::Abandoned),
                FlightState::Pending => {}
            }
            if token.is_cancelled() {
                return Ok(WaitOutcome::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            let slice = poll.min(deadline - now);
            state = self
                .changed
                .wait_timeout(state, slice)
                .map_err(|e| Error::lock_poisoned(format!("flight wait: {e}")))?
                .0;
        }
    }
}
