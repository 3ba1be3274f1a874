//! Method identities.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The identity of an intercepted business method.
///
/// A method id is an opaque, stable name such as `"orders::place"`. The
/// runtime never interprets its structure; it is only compared, hashed and
/// displayed. Cloning is cheap (the name is reference counted).
///
/// # Example
///
/// ```
/// use skalman_core::MethodId;
///
/// let id = MethodId::new("orders::place");
/// assert_eq!(id.as_str(), "orders::place");
///
/// // Validated construction, as used when loading policy sources
/// assert!(MethodId::parse("orders::place").is_ok());
/// assert!(MethodId::parse("  ").is_err());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MethodId(Arc<str>);

impl MethodId {
    /// Create a method id without validation.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Create a method id, rejecting empty names and names containing whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidMethodId`] if the name is malformed.
    pub fn parse(name: impl AsRef<str>) -> Result<Self, CoreError> {
        let name = name.as_ref();
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidMethodId(name.to_string()));
        }
        Ok(Self::new(name))
    }

    /// Get the method name as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this id would be accepted by [`MethodId::parse`].
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && !self.0.chars().any(char::is_whitespace)
    }
}

impl fmt::Debug for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodId({})", self.0)
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MethodId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl TryFrom<String> for MethodId {
    type Error = CoreError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::parse(name)
    }
}

impl From<MethodId> for String {
    fn from(id: MethodId) -> Self {
        id.0.to_string()
    }
}

impl Borrow<str> for MethodId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for MethodId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
