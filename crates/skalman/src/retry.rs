//! Retry of failed invocations.
//!
//! A failed attempt is retried while the error is retryable
//! ([`Error::is_retryable`]), the attempt budget is not spent and the chain is
//! not cancelled. Each retry waits for the policy's backoff delay.

use skalman_core::{MethodId, RetryPolicy};
use tracing::{debug, warn};

use crate::context::CancellationToken;
use crate::error::{Error, Result};

/// Runs an operation until it succeeds or can no longer be retried.
///
/// The executor holds no state of its own; one instance serves every method.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor;

impl RetryExecutor {
    /// Create a new retry executor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Run `op` under `policy`, making at most `max_attempts` attempts.
    ///
    /// `op` receives the 1-based attempt number. `max_attempts` is normally
    /// [`RetryPolicy::max_attempts`]; callers pass 1 when an attempt cannot be
    /// repeated on its own, such as a call joined to an ambient transaction.
    ///
    /// # Errors
    ///
    /// - the error of the first attempt, or of a later attempt that is not
    ///   retryable, unchanged
    /// - [`Error::RetriesExhausted`] when more than one attempt was made and
    ///   the last one still failed with a retryable error
    /// - [`Error::Cancelled`] if the chain is cancelled before an attempt or
    ///   during a backoff delay
    pub fn execute<T, F>(
        &self,
        method: &MethodId,
        policy: &RetryPolicy,
        max_attempts: u32,
        token: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 0;

        loop {
            token.check()?;
            attempt += 1;

            let err = match op(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(%method, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }

            if attempt >= max_attempts {
                if attempt == 1 {
                    return Err(err);
                }
                warn!(%method, attempts = attempt, error = %err, "retries exhausted");
                return Err(Error::RetriesExhausted {
                    attempts: attempt,
                    last_error: Box::new(err),
                });
            }

            let delay = policy.backoff.delay_for_retry(attempt);
            debug!(
                %method,
                attempt,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "retrying after failure"
            );
            if !delay.is_zero() {
                token.sleep(delay)?;
            }
        }
    }
}
