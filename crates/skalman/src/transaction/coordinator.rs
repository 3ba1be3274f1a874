//! Transaction coordinator implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use skalman_core::{
    AccessConflictStrategy, AccessMode, MethodId, Propagation, TransactionId, TransactionPolicy,
};
use skalman_resource::{ResourceError, ResourceManager};
use tracing::{debug, trace, warn};

use super::{
    TransactionEffect, TransactionEffects, TransactionHandle, TransactionObserver, TransactionState,
};
use crate::context::InvocationContext;
use crate::error::{Error, Result};

/// What the coordinator does around one call.
///
/// Produced by [`TransactionCoordinator::plan`] from the method's propagation,
/// its access mode and the ambient transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPlan {
    /// The method has no transaction policy; the ambient transaction (if
    /// any) stays current and untouched.
    Unmanaged,
    /// Run with no transaction.
    RunWithout,
    /// Begin a new transaction owned by this call.
    Begin(AccessMode),
    /// Join the ambient transaction.
    Join,
    /// Suspend the ambient transaction and begin a new one.
    SuspendAndBegin(AccessMode),
    /// Suspend the ambient transaction and run with none.
    SuspendAndRunWithout,
}

impl TransactionPlan {
    /// Returns `true` if the call runs inside whatever transaction is
    /// ambient rather than one it controls.
    #[must_use]
    pub const fn shares_ambient(self) -> bool {
        matches!(self, Self::Join | Self::Unmanaged)
    }

    /// Returns `true` if the call begins (and owns) a transaction.
    #[must_use]
    pub const fn begins(self) -> bool {
        matches!(self, Self::Begin(_) | Self::SuspendAndBegin(_))
    }

    /// Returns `true` if the call suspends the ambient transaction.
    #[must_use]
    pub const fn suspends(self) -> bool {
        matches!(self, Self::SuspendAndBegin(_) | Self::SuspendAndRunWithout)
    }
}

/// Applies propagation rules and drives the transaction state machine.
///
/// The coordinator allocates transaction ids, talks to the
/// [`ResourceManager`] and keeps the [`InvocationContext`] of the calling
/// chain consistent:
///
/// - owners commit on success and roll back on failure, cancellation or
///   unwinding
/// - callers that join an ambient transaction never finish it; a failure
///   marks it rollback-only and the owner rolls back instead of committing
/// - a suspended transaction is resumed exactly once on every exit path
///
/// # Thread Safety
///
/// `TransactionCoordinator` is `Send + Sync`; each call chain passes its own
/// context.
pub struct TransactionCoordinator {
    /// The resource manager all transactions run against.
    resource: Arc<dyn ResourceManager>,

    /// Told about every commit and rollback.
    observer: Option<Arc<dyn TransactionObserver>>,

    /// Counter for generating unique transaction IDs.
    next_tx_id: AtomicU64,
}

impl TransactionCoordinator {
    /// Create a coordinator for the given resource manager.
    pub fn new(resource: Arc<dyn ResourceManager>) -> Self {
        Self { resource, observer: None, next_tx_id: AtomicU64::new(1) }
    }

    /// Report transaction outcomes to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn TransactionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The resource manager.
    #[must_use]
    pub fn resource_manager(&self) -> &Arc<dyn ResourceManager> {
        &self.resource
    }

    /// Number of transaction ids handed out so far.
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.next_tx_id.load(Ordering::Relaxed) - 1
    }

    /// Decide what to do around a call, given the chain's ambient
    /// transaction.
    ///
    /// # Errors
    ///
    /// - [`Error::NoTransactionContext`] for `MANDATORY` without an ambient
    ///   transaction
    /// - [`Error::TransactionContextPresent`] for `NEVER` with one
    /// - [`Error::AccessModeConflict`] when a WRITE method would join a READ
    ///   transaction and the policy rejects the conflict
    pub fn plan(
        &self,
        ctx: &InvocationContext,
        method: &MethodId,
        policy: Option<TransactionPolicy>,
    ) -> Result<TransactionPlan> {
        let Some(policy) = policy else {
            return Ok(TransactionPlan::Unmanaged);
        };
        let begin = policy.begin_mode();
        let ambient = ctx.current().map(|h| (h.id(), h.mode()));

        let plan = match (policy.propagation, ambient) {
            (Propagation::Required | Propagation::RequiresNew, None) => TransactionPlan::Begin(begin),
            (Propagation::Supports | Propagation::Never | Propagation::NotSupported, None) => {
                TransactionPlan::RunWithout
            }
            (Propagation::Mandatory, None) => {
                return Err(Error::NoTransactionContext { method: method.clone() });
            }
            (
                Propagation::Required | Propagation::Supports | Propagation::Mandatory,
                Some((_, active)),
            ) => join_plan(method, &policy, active)?,
            (Propagation::RequiresNew, Some(_)) => TransactionPlan::SuspendAndBegin(begin),
            (Propagation::NotSupported, Some(_)) => TransactionPlan::SuspendAndRunWithout,
            (Propagation::Never, Some((tx, _))) => {
                return Err(Error::TransactionContextPresent { method: method.clone(), tx });
            }
        };

        trace!(%method, propagation = %policy.propagation, ?plan, "planned transaction");
        Ok(plan)
    }

    /// Run `body` according to `plan`.
    ///
    /// `declared` is the method's declared access mode; WRITE methods record
    /// their completion so dependent cache entries are invalidated when the
    /// enclosing transaction commits (or immediately, when no transaction is
    /// involved).
    ///
    /// # Errors
    ///
    /// Returns the error of `body`, a resource-manager failure, or
    /// [`Error::RollbackOnly`] / [`Error::Cancelled`] when an owned
    /// transaction had to be rolled back instead of committed.
    pub fn execute<T, F>(
        &self,
        ctx: &mut InvocationContext,
        method: &MethodId,
        declared: Option<AccessMode>,
        plan: TransactionPlan,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut InvocationContext) -> Result<T>,
    {
        let writes = declared.is_some_and(AccessMode::is_write);
        match plan {
            TransactionPlan::Unmanaged => body(ctx),
            TransactionPlan::RunWithout => self.run_without(ctx, method, writes, body),
            TransactionPlan::Join => self.join(ctx, method, writes, body),
            TransactionPlan::Begin(mode) => self.run_owned(ctx, method, mode, None, writes, body),
            TransactionPlan::SuspendAndBegin(mode) => {
                let mut suspension = self.suspend(ctx, method)?;
                let parent = Some(suspension.id);
                let result =
                    self.run_owned(suspension.context(), method, mode, parent, writes, body);
                finish_suspension(result, suspension.resume())
            }
            TransactionPlan::SuspendAndRunWithout => {
                let mut suspension = self.suspend(ctx, method)?;
                let result = self.run_without(suspension.context(), method, writes, body);
                finish_suspension(result, suspension.resume())
            }
        }
    }

    fn allocate_id(&self) -> TransactionId {
        TransactionId::new(self.next_tx_id.fetch_add(1, Ordering::Relaxed))
    }

    fn run_without<T, F>(
        &self,
        ctx: &mut InvocationContext,
        method: &MethodId,
        writes: bool,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut InvocationContext) -> Result<T>,
    {
        let result = body(ctx);
        // Nothing can be rolled back, so the write counts whatever the outcome.
        if writes {
            self.notify_committed(&TransactionEffects::untransacted_write(method.clone()));
        }
        result
    }

    fn join<T, F>(
        &self,
        ctx: &mut InvocationContext,
        method: &MethodId,
        writes: bool,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut InvocationContext) -> Result<T>,
    {
        trace!(%method, tx_id = ?ctx.current_id(), "joined transaction");
        match body(ctx) {
            Ok(value) => {
                if writes {
                    ctx.record_effect(TransactionEffect::Wrote(method.clone()));
                }
                Ok(value)
            }
            Err(err) => {
                if let Some(handle) = ctx.current_mut() {
                    debug!(%method, tx_id = %handle.id(), error = %err, "marked transaction rollback-only");
                    handle.mark_rollback(Some(err.clone()));
                }
                Err(err)
            }
        }
    }

    fn run_owned<T, F>(
        &self,
        ctx: &mut InvocationContext,
        method: &MethodId,
        mode: AccessMode,
        parent: Option<TransactionId>,
        writes: bool,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut InvocationContext) -> Result<T>,
    {
        let id = self.allocate_id();
        self.resource.begin(id, mode)?;
        debug!(tx_id = %id, %method, %mode, "began transaction");

        ctx.install(TransactionHandle::new(id, mode, parent));
        let owned = OwnedTransaction { coordinator: self, ctx, id, finished: false };

        match body(&mut *owned.ctx) {
            Ok(value) => {
                if writes {
                    owned.ctx.record_effect(TransactionEffect::Wrote(method.clone()));
                }
                if owned.ctx.is_cancelled() {
                    owned.rollback();
                    return Err(Error::Cancelled);
                }
                owned.commit().map(|()| value)
            }
            Err(err) => {
                owned.rollback();
                Err(err)
            }
        }
    }

    fn suspend<'a>(
        &'a self,
        ctx: &'a mut InvocationContext,
        method: &MethodId,
    ) -> Result<Suspension<'a>> {
        let Some(mut handle) = ctx.take_current() else {
            return Err(Error::NoTransactionContext { method: method.clone() });
        };
        let id = handle.id();
        if let Err(err) = self.resource.suspend(id) {
            ctx.install(handle);
            return Err(err.into());
        }
        handle.suspend();
        ctx.push_suspended(handle);
        debug!(tx_id = %id, %method, "suspended transaction");
        Ok(Suspension { coordinator: self, ctx, id, resumed: false })
    }

    /// Resume the most recently suspended transaction. The handle becomes
    /// current again even if the resource manager fails, in which case it is
    /// marked rollback-only.
    fn resume_suspended(&self, ctx: &mut InvocationContext, id: TransactionId) -> Result<()> {
        let Some(mut handle) = ctx.pop_suspended() else {
            return Err(ResourceError::UnknownTransaction(id).into());
        };
        debug_assert_eq!(handle.id(), id);
        let result = self.resource.resume(id);
        handle.resume();
        if let Err(err) = &result {
            handle.mark_rollback(Some(Error::from(err.clone())));
        }
        ctx.install(handle);
        debug!(tx_id = %id, ok = result.is_ok(), "resumed transaction");
        result.map_err(Error::from)
    }

    fn commit_handle(&self, handle: &mut TransactionHandle) -> Result<()> {
        let id = handle.id();
        if handle.is_rollback_only() {
            let cause = handle.take_rollback_cause();
            self.rollback_handle(handle);
            return Err(Error::RollbackOnly { tx: id, cause: cause.map(Box::new) });
        }

        match self.resource.commit(id) {
            Ok(()) => {
                let effects = handle.finish(TransactionState::Committed);
                debug!(tx_id = %id, effects = effects.log.len(), "committed transaction");
                self.notify_committed(&effects);
                Ok(())
            }
            Err(err) => {
                warn!(tx_id = %id, error = %err, "commit failed, rolling back");
                self.rollback_handle(handle);
                Err(err.into())
            }
        }
    }

    fn rollback_handle(&self, handle: &mut TransactionHandle) {
        let id = handle.id();
        if let Err(err) = self.resource.rollback(id) {
            warn!(tx_id = %id, error = %err, "rollback failed");
        }
        let effects = handle.finish(TransactionState::RolledBack);
        debug!(tx_id = %id, "rolled back transaction");
        self.notify_rolled_back(&effects);
    }

    fn notify_committed(&self, effects: &TransactionEffects) {
        if let Some(observer) = &self.observer {
            if !effects.is_empty() {
                observer.committed(effects);
            }
        }
    }

    fn notify_rolled_back(&self, effects: &TransactionEffects) {
        if let Some(observer) = &self.observer {
            if !effects.is_empty() {
                observer.rolled_back(effects);
            }
        }
    }
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("issued", &self.issued())
            .field("has_observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

fn join_plan(
    method: &MethodId,
    policy: &TransactionPolicy,
    active: AccessMode,
) -> Result<TransactionPlan> {
    match policy.access_mode {
        Some(requested) if !requested.can_join(active) => match policy.on_access_conflict {
            AccessConflictStrategy::Reject => Err(Error::AccessModeConflict {
                method: method.clone(),
                requested,
                allowed: active,
            }),
            AccessConflictStrategy::RequiresNew => Ok(TransactionPlan::SuspendAndBegin(requested)),
        },
        _ => Ok(TransactionPlan::Join),
    }
}

fn finish_suspension<T>(result: Result<T>, resumed: Result<()>) -> Result<T> {
    match (result, resumed) {
        (result, Ok(())) => result,
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Err(resume_err)) => {
            warn!(error = %resume_err, "resume failed after failed call");
            Err(err)
        }
    }
}

/// A transaction owned by the running call. Rolled back on drop unless
/// explicitly committed or rolled back.
struct OwnedTransaction<'a> {
    coordinator: &'a TransactionCoordinator,
    ctx: &'a mut InvocationContext,
    id: TransactionId,
    finished: bool,
}

impl OwnedTransaction<'_> {
    fn commit(mut self) -> Result<()> {
        self.finished = true;
        match self.take_handle() {
            Some(mut handle) => self.coordinator.commit_handle(&mut handle),
            None => Err(ResourceError::UnknownTransaction(self.id).into()),
        }
    }

    fn rollback(mut self) {
        self.finished = true;
        self.rollback_now();
    }

    fn take_handle(&mut self) -> Option<TransactionHandle> {
        let handle = self.ctx.take_current();
        debug_assert!(handle.as_ref().is_some_and(|h| h.id() == self.id));
        handle
    }

    fn rollback_now(&mut self) {
        if let Some(mut handle) = self.take_handle() {
            self.coordinator.rollback_handle(&mut handle);
        }
    }
}

impl Drop for OwnedTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(tx_id = %self.id, "rolling back transaction of an unwinding call");
            self.rollback_now();
        }
    }
}

/// A suspended ambient transaction. Resumed on drop unless explicitly
/// resumed.
struct Suspension<'a> {
    coordinator: &'a TransactionCoordinator,
    ctx: &'a mut InvocationContext,
    id: TransactionId,
    resumed: bool,
}

impl Suspension<'_> {
    fn context(&mut self) -> &mut InvocationContext {
        &mut *self.ctx
    }

    fn resume(mut self) -> Result<()> {
        self.resumed = true;
        self.coordinator.resume_suspended(&mut *self.ctx, self.id)
    }
}

impl Drop for Suspension<'_> {
    fn drop(&mut self) {
        if !self.resumed {
            if let Err(err) = self.coordinator.resume_suspended(self.ctx, self.id) {
                warn!(tx_id = %self.id, error = %err, "resume failed while unwinding");
            }
        }
    }
}
