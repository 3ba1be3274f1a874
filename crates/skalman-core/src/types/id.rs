//! Unique identifiers for transactions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for one logical unit of work.
///
/// Identifiers are allocated by the transaction coordinator and handed to the
/// resource manager when the transaction begins. A retried call always gets a
/// fresh identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Create a new `TransactionId` from a raw u64 value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for TransactionId {
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}
