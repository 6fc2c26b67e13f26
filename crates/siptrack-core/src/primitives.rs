//! # Store Primitives
//!
//! Hardcoded constants for the object store.
//!
//! These are compiled into the binary and are immutable at runtime.

use crate::types::Oid;

/// Persisted storage schema version.
///
/// Checked at startup; a mismatch is fatal and requires an external
/// upgrade step.
pub const STORE_VERSION: &str = "1";

/// The oid of the view tree, the single top-level node of every store.
pub const VIEW_TREE_OID: Oid = Oid(0);

/// Current value codec version, written as the first byte of every
/// encoded value.
pub const CODEC_VERSION: u8 = 1;

/// Maximum encoded size of a single stored value (16 MB).
///
/// Checked before decoding so corrupt rows cannot trigger huge allocations.
pub const MAX_VALUE_SIZE: usize = 16 * 1024 * 1024;

/// Default number of versions kept by a versioned attribute.
pub const DEFAULT_MAX_VERSIONS: i64 = 1;

/// Attribute types accepted by `attribute` and `versioned attribute` nodes.
pub const ATTRIBUTE_TYPES: [&str; 4] = ["text", "binary", "int", "bool"];

/// Username of the administrator created when a store is bootstrapped.
pub const DEFAULT_ADMIN_USERNAME: &str = "admin";

/// Name attribute given to the bootstrap user manager.
pub const DEFAULT_USER_MANAGER_NAME: &str = "default user manager";
