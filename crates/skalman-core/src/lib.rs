//! `Skalman` Core
//!
//! This crate provides the shared vocabulary of the Skalman invocation
//! interception runtime: method identities, argument and result values,
//! transaction identifiers, and the policy descriptors that tell the runtime
//! how to cache, transact and retry a business method.
//!
//! # Overview
//!
//! - **Identifiers**: [`MethodId`] names an intercepted method, [`TransactionId`]
//!   names one logical unit of work
//! - **Values**: [`Value`] carries call arguments and results; it hashes
//!   deterministically so argument lists can form cache keys
//! - **Transactions**: [`Propagation`] and [`AccessMode`] describe how a method
//!   participates in an ambient transaction
//! - **Policies**: [`PolicyDescriptor`] bundles the cache, transaction and retry
//!   settings resolved for one method
//!
//! # Example
//!
//! ```
//! use skalman_core::{AccessMode, MethodId, PolicyDescriptor, Propagation, Value};
//!
//! let find = MethodId::new("accounts::find");
//! let update = MethodId::new("accounts::update");
//!
//! let find_policy = PolicyDescriptor::new()
//!     .cacheable()
//!     .depends_on(update.clone())
//!     .propagation(Propagation::Supports)
//!     .access_mode(AccessMode::Read);
//!
//! let update_policy = PolicyDescriptor::new()
//!     .propagation(Propagation::Required)
//!     .access_mode(AccessMode::Write)
//!     .retry(2);
//!
//! assert!(find_policy.cache_enabled());
//! assert_eq!(update_policy.max_retries(), 2);
//! assert!(update_policy.is_write());
//! assert_eq!(Value::from(7i64).as_int(), Some(7));
//! # let _ = find;
//! ```
//!
//! # Modules
//!
//! - [`types`] - Identifiers and [`Value`]
//! - [`transaction`] - Propagation and access-mode enums
//! - [`policy`] - Policy descriptors and retry backoff
//! - [`error`] - Error types ([`CoreError`])

// Deny unwrap in library code to ensure proper error handling
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod policy;
pub mod transaction;
pub mod types;

pub use error::CoreError;
pub use policy::{
    AccessConflictStrategy, Backoff, CachePolicy, PolicyDescriptor, RetryPolicy,
    TransactionPolicy, DEFAULT_MAX_RETRIES,
};
pub use transaction::{AccessMode, Propagation};
pub use types::{MethodId, TransactionId, Value};
