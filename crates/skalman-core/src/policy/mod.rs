//! Policy descriptors.
//!
//! A [`PolicyDescriptor`] is the runtime form of the markers placed on a
//! business method: whether its results are cached (and which writes
//! invalidate them), how it participates in transactions, and whether
//! failures are retried.

mod backoff;
mod descriptor;

pub use backoff::Backoff;
pub use descriptor::{
    AccessConflictStrategy, CachePolicy, PolicyDescriptor, RetryPolicy, TransactionPolicy,
    DEFAULT_MAX_RETRIES,
};
