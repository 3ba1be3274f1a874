//! Transaction handles and the effects they accumulate.

use std::fmt;

use skalman_core::{AccessMode, MethodId, TransactionId};

use crate::cache::CacheKey;
use crate::error::Error;

/// Lifecycle state of a transaction handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Current and usable.
    Active,
    /// Detached while a nested call runs independently.
    Suspended,
    /// A participant failed; the owner will roll back instead of commit.
    MarkedRollback,
    /// Committed (terminal).
    Committed,
    /// Rolled back (terminal).
    RolledBack,
}

impl TransactionState {
    /// Returns `true` for committed and rolled-back handles.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
            Self::MarkedRollback => "MARKED_ROLLBACK",
            Self::Committed => "COMMITTED",
            Self::RolledBack => "ROLLED_BACK",
        };
        f.write_str(name)
    }
}

/// Something that happened inside a transaction and only takes effect on the
/// cache once the transaction's outcome is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionEffect {
    /// A WRITE method completed inside the transaction.
    Wrote(MethodId),
    /// A cacheable result was computed inside the transaction and is staged
    /// until it commits.
    Staged(CacheKey),
}

/// The effects of one transaction, in the order they happened.
///
/// `tx` is `None` for a WRITE method that ran without any transaction; its
/// effects are reported as committed immediately.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionEffects {
    /// The transaction the effects belong to.
    pub tx: Option<TransactionId>,
    /// Ordered effect log.
    pub log: Vec<TransactionEffect>,
}

impl TransactionEffects {
    /// Effects of a WRITE method that ran outside any transaction.
    #[must_use]
    pub fn untransacted_write(method: MethodId) -> Self {
        Self { tx: None, log: vec![TransactionEffect::Wrote(method)] }
    }

    /// WRITE methods in the log, in order and without duplicates.
    pub fn written_methods(&self) -> Vec<&MethodId> {
        let mut methods: Vec<&MethodId> = Vec::new();
        for effect in &self.log {
            if let TransactionEffect::Wrote(method) = effect {
                if !methods.contains(&method) {
                    methods.push(method);
                }
            }
        }
        methods
    }

    /// Returns `true` if nothing happened that the cache must hear about.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}

/// One logical unit of work.
///
/// Handles are created by the coordinator when a call begins a transaction
/// and destroyed once it commits or rolls back. Calls that join the
/// transaction record their effects and failures on the handle.
#[derive(Debug)]
pub struct TransactionHandle {
    id: TransactionId,
    state: TransactionState,
    mode: AccessMode,
    parent: Option<TransactionId>,
    effects: Vec<TransactionEffect>,
    rollback_cause: Option<Error>,
    rollback_only: bool,
}

impl TransactionHandle {
    pub(crate) fn new(id: TransactionId, mode: AccessMode, parent: Option<TransactionId>) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            mode,
            parent,
            effects: Vec::new(),
            rollback_cause: None,
            rollback_only: false,
        }
    }

    /// The transaction id.
    #[must_use]
    pub const fn id(&self) -> TransactionId {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> TransactionState {
        self.state
    }

    /// Access mode the transaction was begun with.
    #[must_use]
    pub const fn mode(&self) -> AccessMode {
        self.mode
    }

    /// The transaction suspended to create this one, if any.
    #[must_use]
    pub const fn parent(&self) -> Option<TransactionId> {
        self.parent
    }

    /// Returns `true` if a participant marked the transaction for rollback.
    #[must_use]
    pub const fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// The failure that first marked the transaction, if recorded.
    #[must_use]
    pub const fn rollback_cause(&self) -> Option<&Error> {
        self.rollback_cause.as_ref()
    }

    /// Effects recorded so far.
    #[must_use]
    pub fn effects(&self) -> &[TransactionEffect] {
        &self.effects
    }

    pub(crate) fn record(&mut self, effect: TransactionEffect) {
        self.effects.push(effect);
    }

    /// Mark the transaction rollback-only. The first recorded cause wins.
    pub(crate) fn mark_rollback(&mut self, cause: Option<Error>) {
        self.rollback_only = true;
        if self.rollback_cause.is_none() {
            self.rollback_cause = cause;
        }
        if self.state == TransactionState::Active {
            self.state = TransactionState::MarkedRollback;
        }
    }

    pub(crate) fn suspend(&mut self) {
        self.state = TransactionState::Suspended;
    }

    pub(crate) fn resume(&mut self) {
        self.state = if self.rollback_only {
            TransactionState::MarkedRollback
        } else {
            TransactionState::Active
        };
    }

    /// Finish the handle, yielding its effects.
    pub(crate) fn finish(&mut self, state: TransactionState) -> TransactionEffects {
        debug_assert!(state.is_terminal());
        self.state = state;
        TransactionEffects { tx: Some(self.id), log: std::mem::take(&mut self.effects) }
    }

    pub(crate) fn take_rollback_cause(&mut self) -> Option<Error> {
        self.rollback_cause.take()
    }
}
