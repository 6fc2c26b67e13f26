//! # Storage Backends
//!
//! The narrow key/value + adjacency contract every backend implements, and
//! the two implementations shipped with the core:
//! - [`MemoryStorage`]: process-local tables, for tests and ephemeral stores
//! - [`RedbStorage`]: an embedded redb database on disk
//!
//! Values are opaque bytes here; encoding lives in [`crate::formats`].
//! Each call is independent. Nothing spans more than one call.

mod memory;
mod redb_store;

pub use memory::MemoryStorage;
pub use redb_store::RedbStorage;

use crate::types::{Oid, Result, SiptrackError};
use async_trait::async_trait;

/// A persisted `(parent, oid)` placement, `None` meaning the tree root.
pub type OidPlacement = (Option<Oid>, Oid);

/// One stored field: `(oid, field name, encoded value)`.
pub type OidData = (Oid, String, Vec<u8>);

/// Backend contract used by the object store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Prepare an empty backend and record `version`; a no-op when a
    /// version marker already exists.
    async fn initialize(&self, version: &str) -> Result<()>;

    /// The persisted schema version marker.
    async fn version(&self) -> Result<Option<String>>;

    async fn add_oid(&self, parent: Option<Oid>, oid: Oid, class_id: &str) -> Result<()>;

    /// Drop the placement, all field data and every association touching
    /// `oid`.
    async fn remove_oid(&self, oid: Oid) -> Result<()>;

    async fn relocate(&self, oid: Oid, new_parent: Option<Oid>) -> Result<()>;

    async fn associate(&self, oid: Oid, other: Oid) -> Result<()>;

    async fn disassociate(&self, oid: Oid, other: Oid) -> Result<()>;

    async fn write_data(&self, oid: Oid, name: &str, value: &[u8]) -> Result<()>;

    async fn read_data(&self, oid: Oid, name: &str) -> Result<Option<Vec<u8>>>;

    /// Every placement, in oid order.
    async fn list_oids(&self) -> Result<Vec<OidPlacement>>;

    async fn list_oid_classes(&self) -> Result<Vec<(Oid, String)>>;

    async fn list_associations(&self) -> Result<Vec<(Oid, Oid)>>;

    /// Bulk dump of all field data for preload.
    async fn iter_oid_data(&self) -> Result<Vec<OidData>>;

    fn is_readonly(&self) -> bool;
}

pub(crate) fn readonly_error() -> SiptrackError {
    SiptrackError::Storage("storage in readonly mode".to_string())
}
