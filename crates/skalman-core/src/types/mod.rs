//! Core data types for `Skalman`.
//!
//! This module defines the identifiers and values that flow through every
//! intercepted call.

mod id;
mod method;
mod value;

pub use id::TransactionId;
pub use method::MethodId;
pub use value::Value;
