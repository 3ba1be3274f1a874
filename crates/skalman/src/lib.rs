//! `Skalman` - An Invocation Interception Runtime
//!
//! Skalman wraps business-method calls in three declarative aspects, driven
//! by a per-method policy: result caching, transaction propagation and retry
//! on transient failure.
//!
//! # Features
//!
//! - **Result Caching**: single-flight, LRU-bounded, invalidated when a
//!   method a cached method depends on writes
//! - **Transactions**: `REQUIRED`, `REQUIRES_NEW`, `SUPPORTS`, `MANDATORY`,
//!   `NEVER` and `NOT_SUPPORTED` propagation with READ/WRITE access modes
//! - **Retry**: bounded re-invocation with backoff; every attempt of an
//!   owning call runs in a fresh transaction
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use skalman::{AccessMode, Dispatcher, PolicyDescriptor, PolicyRegistry, Propagation, Value};
//! use skalman_resource::backends::MemoryResourceManager;
//!
//! let registry = PolicyRegistry::builder()
//!     .register(
//!         "accounts::find",
//!         PolicyDescriptor::new().cacheable().depends_on("accounts::update"),
//!     )
//!     .register(
//!         "accounts::update",
//!         PolicyDescriptor::new()
//!             .propagation(Propagation::Required)
//!             .access_mode(AccessMode::Write)
//!             .retry(2),
//!     )
//!     .build()?;
//!
//! let dispatcher = Dispatcher::new(registry, Arc::new(MemoryResourceManager::new()));
//!
//! let balance = dispatcher.invoke("accounts::find", &[Value::Int(7)], |call| {
//!     load_balance(call.arg(0))
//! })?;
//!
//! dispatcher.invoke("accounts::update", &[Value::Int(7), Value::Int(100)], |call| {
//!     let tx = call.persistence().write()?;
//!     store_balance(tx, call.args())
//! })?;
//! // The committed update invalidated the cached balance.
//! ```
//!
//! # Invocation Order
//!
//! Every call passes Cache → Retry → Transaction → target. A cache hit skips
//! the rest; a retry re-enters the transaction step from scratch.
//!
//! # Modules
//!
//! - [`registry`] - Policy registry and policy sources
//! - [`transaction`] - Propagation, transaction lifecycle and the persistence gate
//! - [`cache`] - Result cache
//! - [`retry`] - Retry executor
//! - [`dispatch`] - The dispatcher and the invocation scope
//! - [`config`] - Dispatcher configuration
//! - [`error`] - Error types

// Deny unwrap in library code to ensure proper error handling
#![deny(clippy::unwrap_used)]

// Re-export core types
pub use skalman_core::{
    AccessConflictStrategy, AccessMode, Backoff, CachePolicy, MethodId, PolicyDescriptor,
    Propagation, RetryPolicy, TransactionId, TransactionPolicy, Value,
};

// Re-export resource manager types
pub use skalman_resource::{ResourceError, ResourceManager, ResourceOp};

// Modules
pub mod cache;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod retry;
pub mod transaction;

// Public API re-exports
pub use cache::{CacheConfig, CacheKey, CacheMetrics, CacheStore, MetricsSnapshot};
pub use config::DispatcherConfig;
pub use context::{CancellationToken, ChainId, InvocationContext};
pub use dispatch::{Dispatcher, DispatcherBuilder, Invocation};
pub use error::{Error, Result};
pub use registry::{JsonPolicySource, PolicyRegistry, PolicyRegistryBuilder, PolicySource};
pub use retry::RetryExecutor;
pub use transaction::{
    PersistenceGate, TransactionCoordinator, TransactionEffect, TransactionEffects,
    TransactionHandle, TransactionObserver, TransactionPlan, TransactionState,
};
