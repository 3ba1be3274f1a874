//! Transaction outcome notifications.

use super::TransactionEffects;

/// Receives the outcome of every transaction the coordinator finishes.
///
/// The cache store implements this to invalidate entries that depend on
/// committed writes and to publish or discard results staged inside the
/// transaction. Callbacks run synchronously on the committing thread, after
/// the resource manager has finished, and before the committing call
/// returns.
pub trait TransactionObserver: Send + Sync {
    /// The transaction committed (or, when `effects.tx` is `None`, a WRITE
    /// method ran without a transaction).
    fn committed(&self, effects: &TransactionEffects);

    /// The transaction rolled back.
    fn rolled_back(&self, effects: &TransactionEffects);
}
