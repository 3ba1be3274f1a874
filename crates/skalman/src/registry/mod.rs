//! Policy registry.
//!
//! The [`PolicyRegistry`] maps every intercepted method to its resolved
//! [`PolicyDescriptor`]. It is built and validated once, before any call is
//! dispatched, and is immutable afterwards: lookups take no locks, and clones
//! share the same underlying map.
//!
//! # Example
//!
//! ```
//! use skalman::PolicyRegistry;
//! use skalman_core::{AccessMode, PolicyDescriptor, Propagation};
//!
//! let registry = PolicyRegistry::builder()
//!     .register("accounts::update", PolicyDescriptor::new().access_mode(AccessMode::Write))
//!     .register(
//!         "accounts::find",
//!         PolicyDescriptor::new()
//!             .cacheable()
//!             .depends_on("accounts::update")
//!             .propagation(Propagation::Supports),
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert!(registry.resolve("accounts::find").unwrap().cache_enabled());
//! assert_eq!(registry.dependents_of("accounts::update").len(), 1);
//! ```

mod source;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use skalman_core::{AccessMode, MethodId, PolicyDescriptor, Propagation};

use crate::error::{Error, Result};

pub use source::{JsonPolicySource, PolicySource};

#[derive(Debug, Default)]
struct RegistryInner {
    policies: HashMap<MethodId, PolicyDescriptor>,
    /// Reverse dependency index: WRITE method -> methods whose cached
    /// results it invalidates.
    dependents: HashMap<MethodId, Vec<MethodId>>,
}

/// Immutable mapping from method identity to policy.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    inner: Arc<RegistryInner>,
}

impl PolicyRegistry {
    /// Start building a registry.
    #[must_use]
    pub fn builder() -> PolicyRegistryBuilder {
        PolicyRegistryBuilder::new()
    }

    /// Build a registry from a policy source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PolicyLoad`] if the source fails or its policies do
    /// not validate.
    pub fn load(source: &impl PolicySource) -> Result<Self> {
        let policies = source.load()?;
        policies
            .into_iter()
            .fold(Self::builder(), |builder, (method, policy)| builder.register(method, policy))
            .build()
    }

    /// Resolve the policy of a method.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedPolicy`] if the method was never registered.
    pub fn resolve(&self, method: &str) -> Result<&PolicyDescriptor> {
        self.resolve_entry(method).map(|(_, policy)| policy)
    }

    /// Resolve a method to its registered identity and policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedPolicy`] if the method was never registered.
    pub fn resolve_entry(&self, method: &str) -> Result<(&MethodId, &PolicyDescriptor)> {
        self.inner
            .policies
            .get_key_value(method)
            .ok_or_else(|| Error::UnresolvedPolicy(MethodId::new(method)))
    }

    /// Look up a policy without failing.
    #[must_use]
    pub fn get(&self, method: &str) -> Option<&PolicyDescriptor> {
        self.inner.policies.get(method)
    }

    /// Returns `true` if the method is registered.
    #[must_use]
    pub fn contains(&self, method: &str) -> bool {
        self.inner.policies.contains_key(method)
    }

    /// Methods whose cached results are invalidated when `method` commits.
    #[must_use]
    pub fn dependents_of(&self, method: &str) -> &[MethodId] {
        self.inner.dependents.get(method).map(Vec::as_slice).unwrap_or_default()
    }

    /// Iterate over all registered methods and their policies.
    pub fn methods(&self) -> impl Iterator<Item = (&MethodId, &PolicyDescriptor)> {
        self.inner.policies.iter()
    }

    /// Number of registered methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.policies.len()
    }

    /// Returns `true` if no method is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.policies.is_empty()
    }
}

/// Builder for a [`PolicyRegistry`].
///
/// Registration never fails; all validation happens in [`build`](Self::build).
#[derive(Debug, Default)]
pub struct PolicyRegistryBuilder {
    entries: Vec<(MethodId, PolicyDescriptor)>,
}

impl PolicyRegistryBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the policy of a method.
    #[must_use]
    pub fn register(mut self, method: impl Into<MethodId>, policy: PolicyDescriptor) -> Self {
        self.entries.push((method.into(), policy));
        self
    }

    /// Validate the registered policies and build the registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PolicyLoad`] if a method id is invalid or registered
    /// twice, if a cache dependency names an unregistered or non-WRITE
    /// method, or if an access mode is combined with `NEVER` or
    /// `NOT_SUPPORTED`.
    pub fn build(self) -> Result<PolicyRegistry> {
        let mut policies = HashMap::with_capacity(self.entries.len());
        for (method, policy) in self.entries {
            if !method.is_valid() {
                return Err(Error::policy_load(format!("invalid method id '{method}'")));
            }
            if let (Some(propagation @ (Propagation::Never | Propagation::NotSupported)), Some(mode)) =
                (policy.propagation, policy.access_mode)
            {
                return Err(Error::policy_load(format!(
                    "method '{method}' declares {mode} access but runs without a transaction ({propagation})"
                )));
            }
            if policies.contains_key(&method) {
                return Err(Error::policy_load(format!("method '{method}' registered twice")));
            }
            policies.insert(method, policy);
        }

        let mut dependents: HashMap<MethodId, Vec<MethodId>> = HashMap::new();
        for (method, policy) in &policies {
            let mut seen = HashSet::new();
            for dependency in &policy.cache.depends_on {
                let target = policies.get(dependency).ok_or_else(|| {
                    Error::policy_load(format!(
                        "method '{method}' depends on unregistered method '{dependency}'"
                    ))
                })?;
                if target.access_mode != Some(AccessMode::Write) {
                    return Err(Error::policy_load(format!(
                        "method '{method}' depends on '{dependency}', which is not a WRITE method"
                    )));
                }
                if seen.insert(dependency) {
                    dependents.entry(dependency.clone()).or_default().push(method.clone());
                }
            }
        }
        for list in dependents.values_mut() {
            list.sort();
        }

        Ok(PolicyRegistry { inner: Arc::new(RegistryInner { policies, dependents }) })
    }
}
