//! Transaction propagation and access-mode vocabulary.
//!
//! Six propagation markers and two access-mode markers are collapsed into
//! two enums so the coordinator can match on them exhaustively.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a method participates in an ambient transaction.
///
/// | Propagation | No existing tx | Existing tx |
/// |---|---|---|
/// | `Required` | begin new | join existing |
/// | `RequiresNew` | begin new | suspend existing, begin new, resume on exit |
/// | `Supports` | run with none | join existing |
/// | `Mandatory` | fail | join existing |
/// | `Never` | run with none | fail |
/// | `NotSupported` | run with none | suspend existing, run with none, resume on exit |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Propagation {
    /// Join the ambient transaction or begin a new one.
    Required,
    /// Always run in a new, independent transaction.
    RequiresNew,
    /// Join the ambient transaction if there is one.
    Supports,
    /// Require an ambient transaction.
    Mandatory,
    /// Refuse to run inside a transaction.
    Never,
    /// Run outside any transaction, suspending the ambient one.
    NotSupported,
}

impl Propagation {
    /// Returns `true` if a method with this propagation can run without a transaction.
    #[must_use]
    pub const fn allows_no_transaction(self) -> bool {
        matches!(self, Self::Supports | Self::Never | Self::NotSupported)
    }

    /// Returns `true` if this propagation never runs inside a transaction.
    #[must_use]
    pub const fn forbids_transaction(self) -> bool {
        matches!(self, Self::Never | Self::NotSupported)
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Required => "REQUIRED",
            Self::RequiresNew => "REQUIRES_NEW",
            Self::Supports => "SUPPORTS",
            Self::Mandatory => "MANDATORY",
            Self::Never => "NEVER",
            Self::NotSupported => "NOT_SUPPORTED",
        };
        f.write_str(name)
    }
}

/// Read/write classification of persistence-context work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Read-only access.
    Read,
    /// Read-write access.
    Write,
}

impl AccessMode {
    /// Returns `true` if work declared with `self` may run inside a
    /// transaction opened with `active`.
    ///
    /// Reads may run inside write transactions; writes may not run inside
    /// read transactions.
    #[must_use]
    pub const fn can_join(self, active: Self) -> bool {
        !matches!((self, active), (Self::Write, Self::Read))
    }

    /// Returns `true` for [`AccessMode::Write`].
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("READ"),
            Self::Write => f.write_str("WRITE"),
        }
    }
}
