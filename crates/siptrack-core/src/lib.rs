//! # siptrack-core
//!
//! The object tree and persistence core of siptrackd.
//!
//! Every domain node (view, device, attribute, permission, user, ...) gets
//! its identity, placement and persistence from this crate:
//! - `tree`: the branch arena with parent/child, association and reference
//!   edges
//! - `registry`: the closed set of node kinds, their permitted children and
//!   the oid allocator
//! - `field`: typed, validated, lazily loaded node fields
//! - `permission`: the ACL cache and access rules
//! - `store`: two-phase load, mutations and batched commit
//! - `storage`: the backend contract plus in-memory and redb backends
//!
//! ## Architectural Constraints
//!
//! - Nodes are addressed by oid handles into the arena, never by pointer
//! - Nothing reaches the backend until a node is explicitly committed
//! - Backend I/O is awaited at well-defined points; the store itself is
//!   driven through `&mut self` and needs no locks

// =============================================================================
// MODULES
// =============================================================================

pub mod event;
pub mod field;
pub mod formats;
pub mod journal;
pub mod node;
pub mod permission;
pub mod primitives;
pub mod registry;
pub mod storage;
pub mod store;
pub mod tree;
pub mod types;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use event::{EventKind, NodeEvent};
pub use field::{Field, FieldKind, StoredField};
pub use journal::{Journal, StorageAction};
pub use node::{Node, NodeArgs};
pub use permission::{Access, PermissionCache, Principal};
pub use primitives::{STORE_VERSION, VIEW_TREE_OID};
pub use registry::{NodeKind, Registry};
pub use storage::{MemoryStorage, RedbStorage, Storage};
pub use store::{NodeFilter, ObjectStore, StoreOptions};
pub use tree::{Branch, FilterResult, Tree};
pub use types::{Oid, Result, SiptrackError, Value};
