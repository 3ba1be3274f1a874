//! The scope handed to a target method.

use skalman_core::{MethodId, PolicyDescriptor, Value};

use super::Dispatcher;
use crate::context::{CancellationToken, ChainId, InvocationContext};
use crate::error::{Error, Result};
use crate::transaction::{PersistenceGate, TransactionHandle};

/// One attempt of an intercepted call, as seen by the target.
///
/// Gives the target its arguments, the transaction it runs in, access to the
/// persistence gate and cancellation, and a way to make nested intercepted
/// calls on the same chain.
pub struct Invocation<'a> {
    dispatcher: &'a Dispatcher,
    ctx: &'a mut InvocationContext,
    method: &'a MethodId,
    policy: &'a PolicyDescriptor,
    args: &'a [Value],
    attempt: u32,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(
        dispatcher: &'a Dispatcher,
        ctx: &'a mut InvocationContext,
        method: &'a MethodId,
        policy: &'a PolicyDescriptor,
        args: &'a [Value],
        attempt: u32,
    ) -> Self {
        Self { dispatcher, ctx, method, policy, args, attempt }
    }

    /// The call's arguments.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        self.args
    }

    /// The argument at `index`.
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// The method being invoked.
    #[must_use]
    pub fn method(&self) -> &MethodId {
        self.method
    }

    /// The method's resolved policy.
    #[must_use]
    pub fn policy(&self) -> &PolicyDescriptor {
        self.policy
    }

    /// The 1-based attempt number.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Nesting depth (0 for the outermost call).
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.ctx.depth()
    }

    /// The chain this call belongs to.
    #[must_use]
    pub fn chain_id(&self) -> ChainId {
        self.ctx.chain_id()
    }

    /// The transaction the call runs in, if any.
    #[must_use]
    pub fn transaction(&self) -> Option<&TransactionHandle> {
        self.ctx.current()
    }

    /// The access-mode gate for persistence operations.
    #[must_use]
    pub fn persistence(&self) -> PersistenceGate<'_> {
        PersistenceGate::new(self.method, self.policy.access_mode, self.ctx.current())
    }

    /// Return [`Error::Cancelled`] if the chain was cancelled.
    ///
    /// Long-running targets should call this between units of work.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] once the chain's token is cancelled.
    pub fn checkpoint(&self) -> Result<()> {
        self.ctx.token().check()
    }

    /// Returns `true` if the chain was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.ctx.is_cancelled()
    }

    /// The chain's cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        self.ctx.token()
    }

    /// Mark the current transaction rollback-only. Its owner rolls it back
    /// instead of committing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoTransactionContext`] when no transaction is current.
    pub fn mark_rollback_only(&mut self) -> Result<()> {
        let handle = self
            .ctx
            .current_mut()
            .ok_or_else(|| Error::NoTransactionContext { method: self.method.clone() })?;
        handle.mark_rollback(None);
        Ok(())
    }

    /// Make a nested intercepted call on this chain.
    ///
    /// # Errors
    ///
    /// As [`Dispatcher::invoke`].
    pub fn invoke<F>(&mut self, method: impl AsRef<str>, args: &[Value], mut target: F) -> Result<Value>
    where
        F: FnMut(&mut Invocation<'_>) -> Result<Value>,
    {
        self.ctx.enter();
        let result = self.dispatcher.dispatch(self.ctx, method.as_ref(), args, &mut target);
        self.ctx.exit();
        result
    }
}

impl std::fmt::Debug for Invocation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("method", self.method)
            .field("args", &self.args)
            .field("attempt", &self.attempt)
            .field("depth", &self.ctx.depth())
            .field("transaction", &self.ctx.current_id())
            .finish_non_exhaustive()
    }
}
