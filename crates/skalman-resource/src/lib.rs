//! Resource manager boundary for `Skalman`.
//!
//! The interception runtime never talks to a database or transaction
//! provider directly. Instead it drives the [`ResourceManager`] trait, the
//! JTA-equivalent boundary offering `begin`, `commit`, `rollback`, `suspend`
//! and `resume`.
//!
//! # Backends
//!
//! - [`backends::MemoryResourceManager`] keeps transaction state in memory,
//!   journals every operation and supports fault injection.
//!
//! # Errors
//!
//! Every operation returns [`ResourceResult`]. Failures are retryable unless
//! they signal a protocol violation; see [`ResourceError::is_retryable`].

// Deny unwrap in library code to ensure proper error handling
#![deny(clippy::unwrap_used)]

pub mod backends;
pub mod manager;

pub use manager::{ResourceError, ResourceManager, ResourceOp, ResourceResult};
