//! Access-mode gate in front of the persistence context.

use skalman_core::{AccessMode, MethodId, TransactionId};

use super::TransactionHandle;
use crate::error::{Error, Result};

/// Checks persistence-context access against the current transaction.
///
/// Obtained from [`Invocation::persistence`](crate::Invocation::persistence).
/// Reads need a transaction; writes additionally need a WRITE transaction
/// and a method that did not declare READ access.
///
/// # Example
///
/// ```ignore
/// let tx = invocation.persistence().write()?;
/// store.save(tx, &account)?;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PersistenceGate<'a> {
    method: &'a MethodId,
    declared: Option<AccessMode>,
    transaction: Option<&'a TransactionHandle>,
}

impl<'a> PersistenceGate<'a> {
    pub(crate) const fn new(
        method: &'a MethodId,
        declared: Option<AccessMode>,
        transaction: Option<&'a TransactionHandle>,
    ) -> Self {
        Self { method, declared, transaction }
    }

    /// Authorize a read, returning the transaction it runs in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoTransactionContext`] without a current transaction.
    pub fn read(&self) -> Result<TransactionId> {
        self.authorize(AccessMode::Read)
    }

    /// Authorize a write, returning the transaction it runs in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoTransactionContext`] without a current transaction,
    /// or [`Error::AccessModeConflict`] inside a READ transaction or from a
    /// method declared READ.
    pub fn write(&self) -> Result<TransactionId> {
        self.authorize(AccessMode::Write)
    }

    /// The current transaction, if any.
    #[must_use]
    pub fn transaction(&self) -> Option<TransactionId> {
        self.transaction.map(TransactionHandle::id)
    }

    fn authorize(&self, requested: AccessMode) -> Result<TransactionId> {
        let handle = self
            .transaction
            .ok_or_else(|| Error::NoTransactionContext { method: self.method.clone() })?;

        let conflict = |allowed| Error::AccessModeConflict {
            method: self.method.clone(),
            requested,
            allowed,
        };
        if let Some(declared) = self.declared {
            if !requested.can_join(declared) {
                return Err(conflict(declared));
            }
        }
        if !requested.can_join(handle.mode()) {
            return Err(conflict(handle.mode()));
        }
        Ok(handle.id())
    }
}
