//! In-memory resource manager.
//!
//! [`MemoryResourceManager`] tracks transaction state in memory and records
//! every successful operation in a journal. Failures can be injected per
//! operation, which makes it the backend of choice for tests and benchmarks.
//!
//! # Example
//!
//! ```
//! use skalman_core::{AccessMode, TransactionId};
//! use skalman_resource::backends::{MemoryResourceManager, ResourceEvent};
//! use skalman_resource::{ResourceError, ResourceManager, ResourceOp};
//!
//! let rm = MemoryResourceManager::new();
//! let id = TransactionId::new(1);
//!
//! // The next commit fails once
//! rm.fail_next(ResourceOp::Commit, ResourceError::contention(ResourceOp::Commit, "deadlock"));
//!
//! rm.begin(id, AccessMode::Write).unwrap();
//! assert!(rm.commit(id).is_err());
//! rm.rollback(id).unwrap();
//!
//! assert_eq!(
//!     rm.journal(),
//!     vec![ResourceEvent::Begin { id, mode: AccessMode::Write }, ResourceEvent::Rollback(id)]
//! );
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use skalman_core::{AccessMode, TransactionId};
use tracing::trace;

use crate::manager::{ResourceError, ResourceManager, ResourceOp, ResourceResult};

/// State of a transaction as seen by the in-memory backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Begun and attached.
    Active,
    /// Begun and detached.
    Suspended,
    /// Committed.
    Committed,
    /// Rolled back.
    RolledBack,
}

/// A successful operation recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceEvent {
    /// A transaction began.
    Begin {
        /// The transaction.
        id: TransactionId,
        /// Its access mode.
        mode: AccessMode,
    },
    /// A transaction committed.
    Commit(TransactionId),
    /// A transaction rolled back.
    Rollback(TransactionId),
    /// A transaction was suspended.
    Suspend(TransactionId),
    /// A transaction was resumed.
    Resume(TransactionId),
}

impl ResourceEvent {
    /// The transaction this event concerns.
    #[must_use]
    pub const fn id(&self) -> TransactionId {
        match self {
            Self::Begin { id, .. }
            | Self::Commit(id)
            | Self::Rollback(id)
            | Self::Suspend(id)
            | Self::Resume(id) => *id,
        }
    }

    /// The operation this event records.
    #[must_use]
    pub const fn op(&self) -> ResourceOp {
        match self {
            Self::Begin { .. } => ResourceOp::Begin,
            Self::Commit(_) => ResourceOp::Commit,
            Self::Rollback(_) => ResourceOp::Rollback,
            Self::Suspend(_) => ResourceOp::Suspend,
            Self::Resume(_) => ResourceOp::Resume,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TransactionRecord {
    mode: AccessMode,
    status: TransactionStatus,
}

#[derive(Debug, Default)]
struct MemoryState {
    transactions: HashMap<TransactionId, TransactionRecord>,
    journal: Vec<ResourceEvent>,
    faults: HashMap<ResourceOp, VecDeque<ResourceError>>,
}

/// A thread-safe, in-memory [`ResourceManager`].
#[derive(Debug, Default)]
pub struct MemoryResourceManager {
    state: Mutex<MemoryState>,
    begin_latency: Option<Duration>,
}

impl MemoryResourceManager {
    /// Create an empty resource manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `begin` block for `latency` before acquiring the
    /// transaction, simulating connection acquisition.
    #[must_use]
    pub fn with_begin_latency(mut self, latency: Duration) -> Self {
        self.begin_latency = Some(latency);
        self
    }

    /// Make the next call of `op` fail with `error`.
    ///
    /// Faults queue up: calling this twice makes the next two calls fail.
    pub fn fail_next(&self, op: ResourceOp, error: ResourceError) {
        self.fail_times(op, 1, error);
    }

    /// Make the next `count` calls of `op` fail with `error`.
    pub fn fail_times(&self, op: ResourceOp, count: usize, error: ResourceError) {
        if let Ok(mut state) = self.state.lock() {
            let queue = state.faults.entry(op).or_default();
            queue.extend(std::iter::repeat(error).take(count));
        }
    }

    /// Drop all pending injected faults.
    pub fn clear_faults(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.faults.clear();
        }
    }

    /// A copy of the journal of successful operations, in order.
    #[must_use]
    pub fn journal(&self) -> Vec<ResourceEvent> {
        self.state.lock().map(|s| s.journal.clone()).unwrap_or_default()
    }

    /// Number of successful calls of `op`.
    #[must_use]
    pub fn count(&self, op: ResourceOp) -> usize {
        self.state
            .lock()
            .map(|s| s.journal.iter().filter(|e| e.op() == op).count())
            .unwrap_or(0)
    }

    /// The current status of a transaction, if it was ever begun.
    #[must_use]
    pub fn status(&self, id: TransactionId) -> Option<TransactionStatus> {
        self.state.lock().ok().and_then(|s| s.transactions.get(&id).map(|r| r.status))
    }

    /// The access mode a transaction was begun with.
    #[must_use]
    pub fn mode(&self, id: TransactionId) -> Option<AccessMode> {
        self.state.lock().ok().and_then(|s| s.transactions.get(&id).map(|r| r.mode))
    }

    /// Ids of committed transactions, in commit order.
    #[must_use]
    pub fn committed(&self) -> Vec<TransactionId> {
        self.events_of(ResourceOp::Commit)
    }

    /// Ids of rolled-back transactions, in rollback order.
    #[must_use]
    pub fn rolled_back(&self) -> Vec<TransactionId> {
        self.events_of(ResourceOp::Rollback)
    }

    /// Number of transactions that are begun but neither committed nor
    /// rolled back (active or suspended).
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.state
            .lock()
            .map(|s| {
                s.transactions
                    .values()
                    .filter(|r| {
                        matches!(r.status, TransactionStatus::Active | TransactionStatus::Suspended)
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    fn events_of(&self, op: ResourceOp) -> Vec<TransactionId> {
        self.state
            .lock()
            .map(|s| s.journal.iter().filter(|e| e.op() == op).map(ResourceEvent::id).collect())
            .unwrap_or_default()
    }

    /// Apply a state transition, honouring injected faults.
    fn transition(
        &self,
        op: ResourceOp,
        id: TransactionId,
        apply: impl FnOnce(&mut MemoryState) -> ResourceResult<ResourceEvent>,
    ) -> ResourceResult<()> {
        let mut state =
            self.state.lock().map_err(|e| ResourceError::Other(format!("state lock poisoned: {e}")))?;

        if let Some(error) = state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            trace!(%op, tx_id = %id, %error, "injected resource failure");
            return Err(error);
        }

        let event = apply(&mut state)?;
        state.journal.push(event);
        trace!(%op, tx_id = %id, "resource operation applied");
        Ok(())
    }
}

fn expect_status(
    state: &mut MemoryState,
    op: ResourceOp,
    id: TransactionId,
    expected: TransactionStatus,
    next: TransactionStatus,
) -> ResourceResult<()> {
    let record = state.transactions.get_mut(&id).ok_or(ResourceError::UnknownTransaction(id))?;
    if record.status != expected {
        return Err(ResourceError::invalid_state(
            op,
            id,
            format!("expected {expected:?}, found {:?}", record.status),
        ));
    }
    record.status = next;
    Ok(())
}

impl ResourceManager for MemoryResourceManager {
    fn begin(&self, id: TransactionId, mode: AccessMode) -> ResourceResult<()> {
        if let Some(latency) = self.begin_latency {
            thread::sleep(latency);
        }
        self.transition(ResourceOp::Begin, id, |state| {
            if state.transactions.contains_key(&id) {
                return Err(ResourceError::invalid_state(
                    ResourceOp::Begin,
                    id,
                    "transaction id already used",
                ));
            }
            state.transactions.insert(id, TransactionRecord { mode, status: TransactionStatus::Active });
            Ok(ResourceEvent::Begin { id, mode })
        })
    }

    fn commit(&self, id: TransactionId) -> ResourceResult<()> {
        self.transition(ResourceOp::Commit, id, |state| {
            expect_status(
                state,
                ResourceOp::Commit,
                id,
                TransactionStatus::Active,
                TransactionStatus::Committed,
            )?;
            Ok(ResourceEvent::Commit(id))
        })
    }

    fn rollback(&self, id: TransactionId) -> ResourceResult<()> {
        self.transition(ResourceOp::Rollback, id, |state| {
            // A suspended transaction whose resume failed can still be
            // rolled back.
            let expected = match state.transactions.get(&id) {
                Some(record) if record.status == TransactionStatus::Suspended => {
                    TransactionStatus::Suspended
                }
                _ => TransactionStatus::Active,
            };
            expect_status(state, ResourceOp::Rollback, id, expected, TransactionStatus::RolledBack)?;
            Ok(ResourceEvent::Rollback(id))
        })
    }

    fn suspend(&self, id: TransactionId) -> ResourceResult<()> {
        self.transition(ResourceOp::Suspend, id, |state| {
            expect_status(
                state,
                ResourceOp::Suspend,
                id,
                TransactionStatus::Active,
                TransactionStatus::Suspended,
            )?;
            Ok(ResourceEvent::Suspend(id))
        })
    }

    fn resume(&self, id: TransactionId) -> ResourceResult<()> {
        self.transition(ResourceOp::Resume, id, |state| {
            expect_status(
                state,
                ResourceOp::Resume,
                id,
                TransactionStatus::Suspended,
                TransactionStatus::Active,
            )?;
            Ok(ResourceEvent::Resume(id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(n: u64) -> TransactionId {
        TransactionId::new(n)
    }

    #[test]
    fn test_begin_commit_lifecycle() {
        let rm = MemoryResourceManager::new();
        rm.begin(tx(1), AccessMode::Read).expect("begin");
        assert_eq!(rm.status(tx(1)), Some(TransactionStatus::Active));
        assert_eq!(rm.mode(tx(1)), Some(AccessMode::Read));
        assert_eq!(rm.open_count(), 1);

        rm.commit(tx(1)).expect("commit");
        assert_eq!(rm.status(tx(1)), Some(TransactionStatus::Committed));
        assert_eq!(rm.committed(), vec![tx(1)]);
        assert_eq!(rm.open_count(), 0);
    }

    #[test]
    fn test_suspend_resume() {
        let rm = MemoryResourceManager::new();
        rm.begin(tx(1), AccessMode::Write).expect("begin");
        rm.suspend(tx(1)).expect("suspend");
        assert_eq!(rm.status(tx(1)), Some(TransactionStatus::Suspended));

        // A suspended transaction cannot commit
        let err = rm.commit(tx(1)).expect_err("commit while suspended");
        assert!(!err.is_retryable());

        rm.resume(tx(1)).expect("resume");
        rm.rollback(tx(1)).expect("rollback");
        assert_eq!(rm.rolled_back(), vec![tx(1)]);
    }

    #[test]
    fn test_rollback_while_suspended() {
        let rm = MemoryResourceManager::new();
        rm.begin(tx(1), AccessMode::Write).expect("begin");
        rm.suspend(tx(1)).expect("suspend");
        rm.rollback(tx(1)).expect("rollback");
        assert_eq!(rm.status(tx(1)), Some(TransactionStatus::RolledBack));
        assert_eq!(rm.open_count(), 0);
    }

    #[test]
    fn test_unknown_transaction() {
        let rm = MemoryResourceManager::new();
        assert_eq!(rm.commit(tx(9)), Err(ResourceError::UnknownTransaction(tx(9))));
    }

    #[test]
    fn test_duplicate_begin_rejected() {
        let rm = MemoryResourceManager::new();
        rm.begin(tx(1), AccessMode::Write).expect("begin");
        assert!(rm.begin(tx(1), AccessMode::Write).is_err());
    }

    #[test]
    fn test_injected_faults_are_consumed_in_order() {
        let rm = MemoryResourceManager::new();
        rm.fail_times(ResourceOp::Begin, 2, ResourceError::unavailable(ResourceOp::Begin, "down"));

        assert!(rm.begin(tx(1), AccessMode::Write).is_err());
        assert!(rm.begin(tx(2), AccessMode::Write).is_err());
        rm.begin(tx(3), AccessMode::Write).expect("third begin succeeds");

        assert_eq!(rm.count(ResourceOp::Begin), 1);
        assert_eq!(rm.status(tx(1)), None);
    }

    #[test]
    fn test_clear_faults() {
        let rm = MemoryResourceManager::new();
        rm.fail_next(ResourceOp::Begin, ResourceError::Other("x".into()));
        rm.clear_faults();
        rm.begin(tx(1), AccessMode::Write).expect("begin");
    }
}
