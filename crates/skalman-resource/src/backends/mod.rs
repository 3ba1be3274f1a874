//! Resource manager backend implementations.
//!
//! - [`MemoryResourceManager`] - in-memory, journaling backend with fault injection

pub mod memory;

pub use memory::{MemoryResourceManager, ResourceEvent, TransactionStatus};
