//! Invocation dispatch.
//!
//! The [`Dispatcher`] wraps every intercepted call in the same fixed order:
//!
//! ```text
//! caller ─▶ Cache Store ─▶ Retry Executor ─▶ Transaction Coordinator ─▶ target
//!   ▲        (hit / wait /    (attempt loop)    (begin / join / suspend)    │
//!   │         lead)                                                        │
//!   └──────── store / invalidate ◀── commit / rollback ◀───────────────────┘
//! ```
//!
//! A cache hit never reaches the retry loop; every retry re-enters the
//! coordinator from scratch, so each attempt of an owning call runs in a
//! fresh transaction.

mod invocation;

use std::sync::Arc;

use skalman_core::{MethodId, PolicyDescriptor, Value};
use skalman_resource::ResourceManager;
use tracing::trace;

use crate::cache::{CacheKey, CacheStore};
use crate::config::DispatcherConfig;
use crate::context::{CancellationToken, InvocationContext};
use crate::error::{Error, Result};
use crate::registry::PolicyRegistry;
use crate::retry::RetryExecutor;
use crate::transaction::{TransactionCoordinator, TransactionObserver, TransactionPlan};

pub use invocation::Invocation;

/// Entry point of the interception runtime.
///
/// A dispatcher owns the policy registry, the result cache, the transaction
/// coordinator and the retry executor. It is `Send + Sync`; share it between
/// threads behind an [`Arc`]. Each outermost call gets its own
/// [`InvocationContext`], and nested calls made through
/// [`Invocation::invoke`] reuse it.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use skalman::{Dispatcher, PolicyDescriptor, PolicyRegistry, Propagation, Value};
/// use skalman_resource::backends::MemoryResourceManager;
///
/// let registry = PolicyRegistry::builder()
///     .register("accounts::find", PolicyDescriptor::new().cacheable().propagation(Propagation::Supports))
///     .build()?;
/// let dispatcher = Dispatcher::new(registry, Arc::new(MemoryResourceManager::new()));
///
/// let balance = dispatcher.invoke("accounts::find", &[Value::Int(7)], |call| {
///     Ok(Value::Int(call.arg(0).and_then(Value::as_int).unwrap_or(0) * 6))
/// })?;
/// assert_eq!(balance, Value::Int(42));
/// # Ok::<(), skalman::Error>(())
/// ```
pub struct Dispatcher {
    registry: PolicyRegistry,
    cache: Arc<CacheStore>,
    coordinator: TransactionCoordinator,
    retry: RetryExecutor,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a dispatcher with the default configuration.
    #[must_use]
    pub fn new(registry: PolicyRegistry, resource: Arc<dyn ResourceManager>) -> Self {
        Self::with_config(registry, resource, DispatcherConfig::default())
    }

    /// Returns a builder for creating a dispatcher with custom configuration.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let dispatcher = Dispatcher::builder()
    ///     .registry(registry)
    ///     .resource_manager(Arc::new(MemoryResourceManager::new()))
    ///     .config(DispatcherConfig::new().cache(CacheConfig::disabled()))
    ///     .build()?;
    /// ```
    #[must_use]
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    fn with_config(
        registry: PolicyRegistry,
        resource: Arc<dyn ResourceManager>,
        config: DispatcherConfig,
    ) -> Self {
        let cache = Arc::new(
            CacheStore::new(config.cache.clone(), registry.clone())
                .with_wait_limits(config.pending_wait_timeout, config.cancellation_poll_interval),
        );
        let observer = Arc::clone(&cache) as Arc<dyn TransactionObserver>;
        let coordinator = TransactionCoordinator::new(resource).with_observer(observer);
        Self { registry, cache, coordinator, retry: RetryExecutor::new(), config }
    }

    /// Invoke `method` as the outermost call of a new chain.
    ///
    /// `target` is the business method body. It may run several times
    /// (retries) or not at all (cache hit, fatal propagation error).
    ///
    /// Propagation is checked before the cache, so a `MANDATORY` or `NEVER`
    /// method fails in the wrong transaction context even when its result is
    /// cached.
    ///
    /// # Errors
    ///
    /// - [`Error::UnresolvedPolicy`] if `method` is not registered
    /// - propagation errors ([`Error::NoTransactionContext`],
    ///   [`Error::TransactionContextPresent`], [`Error::AccessModeConflict`])
    /// - the target's error, possibly wrapped in [`Error::RetriesExhausted`]
    /// - transaction failures ([`Error::ResourceManager`],
    ///   [`Error::RollbackOnly`]) and [`Error::Cancelled`]
    pub fn invoke<F>(&self, method: impl AsRef<str>, args: &[Value], target: F) -> Result<Value>
    where
        F: FnMut(&mut Invocation<'_>) -> Result<Value>,
    {
        self.invoke_with_token(CancellationToken::new(), method, args, target)
    }

    /// Invoke `method` as the outermost call of a new chain that can be
    /// cancelled through `token`.
    ///
    /// Cancellation stops further retries, rolls back the transactions the
    /// chain owns and ends waits on other callers' computations.
    ///
    /// # Errors
    ///
    /// As [`invoke`](Self::invoke).
    pub fn invoke_with_token<F>(
        &self,
        token: CancellationToken,
        method: impl AsRef<str>,
        args: &[Value],
        mut target: F,
    ) -> Result<Value>
    where
        F: FnMut(&mut Invocation<'_>) -> Result<Value>,
    {
        let mut ctx = InvocationContext::new(token);
        self.dispatch(&mut ctx, method.as_ref(), args, &mut target)
    }

    /// Get the policy registry.
    #[must_use]
    pub const fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    /// Get the result cache.
    #[must_use]
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Get the transaction coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub(crate) fn dispatch<F>(
        &self,
        ctx: &mut InvocationContext,
        method: &str,
        args: &[Value],
        target: &mut F,
    ) -> Result<Value>
    where
        F: FnMut(&mut Invocation<'_>) -> Result<Value>,
    {
        let (method, policy) = self.registry.resolve_entry(method)?;
        ctx.token().check()?;

        // Propagation errors are fatal: decided once, before the cache and
        // the retry loop, so the target never runs and nothing is cached.
        let plan = self.coordinator.plan(ctx, method, policy.transaction())?;
        trace!(%method, depth = ctx.depth(), chain = %ctx.chain_id(), ?plan, "dispatching");

        if self.cache.is_enabled() && policy.cache_enabled() {
            let key = CacheKey::new(method.clone(), args);
            let stage = plan.shares_ambient() && ctx.current().is_some_and(|h| h.mode().is_write());
            return self.cache.get_or_compute(ctx, &key, stage, |ctx| {
                self.attempts(ctx, method, policy, plan, args, target)
            });
        }
        self.attempts(ctx, method, policy, plan, args, target)
    }

    fn attempts<F>(
        &self,
        ctx: &mut InvocationContext,
        method: &MethodId,
        policy: &PolicyDescriptor,
        plan: TransactionPlan,
        args: &[Value],
        target: &mut F,
    ) -> Result<Value>
    where
        F: FnMut(&mut Invocation<'_>) -> Result<Value>,
    {
        // A joined call cannot be retried on its own: its failure has already
        // doomed the ambient transaction.
        let max_attempts = if matches!(plan, TransactionPlan::Join) {
            1
        } else {
            policy.retry.max_attempts()
        };
        let token = ctx.token().clone();

        self.retry.execute(method, &policy.retry, max_attempts, &token, |attempt| {
            self.coordinator.execute(ctx, method, policy.access_mode, plan, |ctx| {
                let mut invocation = Invocation::new(self, ctx, method, policy, args, attempt);
                target(&mut invocation)
            })
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("methods", &self.registry.len())
            .field("cache", &self.cache)
            .field("coordinator", &self.coordinator)
            .field("config", &self.config)
            .finish()
    }
}

/// Builder for [`Dispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    registry: Option<PolicyRegistry>,
    resource: Option<Arc<dyn ResourceManager>>,
    config: DispatcherConfig,
}

impl DispatcherBuilder {
    /// Create a new builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the policy registry.
    #[must_use]
    pub fn registry(mut self, registry: PolicyRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the resource manager transactions run against.
    #[must_use]
    pub fn resource_manager(mut self, resource: Arc<dyn ResourceManager>) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the dispatcher.
    ///
    /// A missing registry defaults to an empty one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no resource manager was set or the
    /// configuration is invalid.
    pub fn build(self) -> Result<Dispatcher> {
        self.config.validate()?;
        let resource =
            self.resource.ok_or_else(|| Error::config("a resource manager is required"))?;
        Ok(Dispatcher::with_config(self.registry.unwrap_or_default(), resource, self.config))
    }
}

impl std::fmt::Debug for DispatcherBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherBuilder")
            .field("registry", &self.registry.as_ref().map(PolicyRegistry::len))
            .field("resource", &self.resource.is_some())
            .field("config", &self.config)
            .finish()
    }
}
