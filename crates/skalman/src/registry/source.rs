//! Policy sources.

use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use skalman_core::{MethodId, PolicyDescriptor};

use crate::error::{Error, Result};

/// Supplies the policy of every intercepted method at startup.
///
/// Metadata discovery (turning markers on methods into descriptors) lives
/// behind this trait; the runtime only consumes its output.
pub trait PolicySource {
    /// Load all method policies.
    ///
    /// # Errors
    ///
    /// Any failure is reported as [`Error::PolicyLoad`] and is fatal.
    fn load(&self) -> Result<Vec<(MethodId, PolicyDescriptor)>>;
}

impl PolicySource for Vec<(MethodId, PolicyDescriptor)> {
    fn load(&self) -> Result<Vec<(MethodId, PolicyDescriptor)>> {
        Ok(self.clone())
    }
}

#[derive(Debug, Deserialize)]
struct PolicyDocument {
    #[serde(default)]
    policies: Vec<PolicyRecord>,
}

#[derive(Debug, Deserialize)]
struct PolicyRecord {
    method: MethodId,
    #[serde(flatten)]
    policy: PolicyDescriptor,
}

#[derive(Debug, Clone)]
enum JsonInput {
    Text(String),
    File(PathBuf),
}

/// Reads policies from a JSON document.
///
/// The document lists one record per method; omitted fields take their
/// defaults:
///
/// ```json
/// {
///   "policies": [
///     { "method": "accounts::update", "access_mode": "write",
///       "retry": { "enabled": true, "max_retries": 2 } },
///     { "method": "accounts::find", "propagation": "supports",
///       "cache": { "enabled": true, "depends_on": ["accounts::update"] } }
///   ]
/// }
/// ```
#[derive(Debug, Clone)]
pub struct JsonPolicySource {
    input: JsonInput,
}

impl JsonPolicySource {
    /// A source reading the given JSON text.
    #[must_use]
    pub fn from_json(json: impl Into<String>) -> Self {
        Self { input: JsonInput::Text(json.into()) }
    }

    /// A source reading a JSON file when loaded.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { input: JsonInput::File(path.into()) }
    }
}

impl PolicySource for JsonPolicySource {
    fn load(&self) -> Result<Vec<(MethodId, PolicyDescriptor)>> {
        let document: PolicyDocument = match &self.input {
            JsonInput::Text(text) => serde_json::from_str(text),
            JsonInput::File(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    Error::policy_load(format!("failed to read {}: {e}", path.display()))
                })?;
                serde_json::from_str(&text)
            }
        }
        .map_err(|e| Error::policy_load(format!("invalid policy document: {e}")))?;

        Ok(document.policies.into_iter().map(|r| (r.method, r.policy)).collect())
    }
}
