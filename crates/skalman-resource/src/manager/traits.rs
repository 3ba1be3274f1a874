//! The resource manager trait.

use std::fmt;

use skalman_core::{AccessMode, TransactionId};

use super::ResourceResult;

/// An operation on a resource manager, used in errors and journals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceOp {
    /// Start a transaction.
    Begin,
    /// Make a transaction's work durable.
    Commit,
    /// Discard a transaction's work.
    Rollback,
    /// Detach a transaction from the current thread of work.
    Suspend,
    /// Reattach a suspended transaction.
    Resume,
}

impl fmt::Display for ResourceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Begin => "begin",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
            Self::Suspend => "suspend",
            Self::Resume => "resume",
        };
        f.write_str(name)
    }
}

/// A transactional resource manager (JTA-equivalent).
///
/// The runtime drives the resource manager through the transaction
/// coordinator; it never opens physical connections itself. Transaction ids
/// are allocated by the coordinator and passed to [`begin`](Self::begin).
/// Implementations must be thread-safe (`Send + Sync`): independent call
/// chains drive independent transactions concurrently.
///
/// Any method may block (for example while acquiring a connection).
///
/// # Example
///
/// ```ignore
/// use skalman_resource::{ResourceManager, ResourceResult};
///
/// fn unit_of_work<R: ResourceManager>(rm: &R, id: TransactionId) -> ResourceResult<()> {
///     rm.begin(id, AccessMode::Write)?;
///     // ... work ...
///     rm.commit(id)
/// }
/// ```
pub trait ResourceManager: Send + Sync {
    /// Begin a transaction with the given id and access mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started.
    fn begin(&self, id: TransactionId, mode: AccessMode) -> ResourceResult<()>;

    /// Commit an active transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails. The transaction is then
    /// considered rolled back by the caller.
    fn commit(&self, id: TransactionId) -> ResourceResult<()>;

    /// Roll back an active transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    fn rollback(&self, id: TransactionId) -> ResourceResult<()>;

    /// Suspend an active transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be suspended.
    fn suspend(&self, id: TransactionId) -> ResourceResult<()>;

    /// Resume a suspended transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be resumed.
    fn resume(&self, id: TransactionId) -> ResourceResult<()>;
}
