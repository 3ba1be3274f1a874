//! Resource manager traits and abstractions.
//!
//! - [`ResourceManager`] - begin/commit/rollback/suspend/resume primitives
//! - [`ResourceOp`] - names of those primitives
//!
//! # Error Handling
//!
//! All operations return [`ResourceResult<T>`], an alias for
//! `Result<T, ResourceError>`. See [`ResourceError`] for the variants and
//! which of them are retryable.

mod error;
mod traits;

pub use error::{ResourceError, ResourceResult};
pub use traits::{ResourceManager, ResourceOp};
