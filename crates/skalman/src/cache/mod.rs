//! Result caching for cacheable methods.
//!
//! Results are keyed by method and argument values. Concurrent callers of the
//! same key share one computation, and a write to a method invalidates the
//! cached results of every method declared to depend on it.
//!
//! # Usage
//!
//! ```ignore
//! let cache = CacheStore::new(CacheConfig::default(), registry);
//! let key = CacheKey::new(MethodId::new("find"), &[Value::Int(7)]);
//! let value = cache.get_or_compute(&mut ctx, &key, false, |ctx| target(ctx))?;
//! ```

mod flight;
mod key;
mod metrics;
mod store;

pub use key::CacheKey;
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use store::{CacheConfig, CacheStore};
