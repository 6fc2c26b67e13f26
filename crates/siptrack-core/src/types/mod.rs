//! # Core Type Definitions
//!
//! This module contains the types shared by every layer of the object tree:
//! - Object identifiers (`Oid`)
//! - Stored field values (`Value`)
//! - Error types (`SiptrackError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` where they key a `BTreeMap`/`BTreeSet`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// OBJECT IDENTIFIER
// =============================================================================

/// Globally unique, monotonically allocated object identifier.
///
/// An oid is handed out once by the registry and never reused, even after
/// the node it named has been removed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Oid(pub u64);

impl Oid {
    /// Get the raw identifier value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Oid {
    type Err = SiptrackError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(Oid)
            .map_err(|_| SiptrackError::NonExistent(format!("invalid oid: {s}")))
    }
}

// =============================================================================
// STORED VALUES
// =============================================================================

/// A self-describing stored value.
///
/// Backends never look inside a value; the core encodes it with the codec in
/// [`crate::formats`] before handing bytes to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Text(String),
    Binary(Vec<u8>),
    /// A reference to another node, stored as its oid.
    Ref(Oid),
    List(Vec<Value>),
}

impl Value {
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_ref_oid(&self) -> Option<Oid> {
        match self {
            Value::Ref(oid) => Some(*oid),
            _ => None,
        }
    }

    /// Name of the value's type, as used by attribute `atype` checks.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Text(_) => "text",
            Value::Binary(_) => "binary",
            Value::Ref(_) => "reference",
            Value::List(_) => "list",
        }
    }

    /// Drop references to nodes that are no longer live.
    ///
    /// A dangling `Ref` becomes `None`; dangling members of a `List` are
    /// removed. Returns `true` when anything was dropped.
    pub fn prune_dangling(&mut self, is_live: &dyn Fn(Oid) -> bool) -> bool {
        match self {
            Value::Ref(oid) if !is_live(*oid) => {
                *self = Value::None;
                true
            }
            Value::List(items) => {
                let before = items.len();
                items.retain(|item| item.as_ref_oid().is_none_or(|oid| is_live(oid)));
                items.len() != before
            }
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Oid> for Value {
    fn from(oid: Oid) -> Self {
        Value::Ref(oid)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "none"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::Ref(oid) => write!(f, "oid:{oid}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the object tree and its persistence layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SiptrackError {
    /// The oid does not exist, or exists but failed a type filter.
    #[error("object doesn't exist: {0}")]
    NonExistent(String),

    /// A branch or named child with the same identity already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Read or write access was refused.
    #[error("permission denied")]
    PermissionDenied,

    /// A field validator rejected a value.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A schema or graph rule was violated.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A field that must carry a value has none.
    #[error("missing data: {0}")]
    MissingData(String),

    /// The persisted schema version is not the one this build speaks.
    #[error("wanted storage version {wanted}, got version {found}, try upgrading")]
    InvalidStorageVersion { wanted: String, found: String },

    /// A backend-level failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl SiptrackError {
    /// Permission failures are reported as a kind of not-found to callers
    /// that only distinguish "can I see it".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SiptrackError::NonExistent(_) | SiptrackError::PermissionDenied
        )
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SiptrackError>;
