//! # Object Store
//!
//! Orchestrates everything above the backend:
//! - two-phase load of the tree and node data ([`ObjectStore::open`])
//! - lazy materialization of nodes from their branch
//! - node mutations, each queued on the node's journal
//! - batched commit of the queued actions ([`ObjectStore::commit`])
//! - permission checks over the cached ACL entries
//!
//! All state that used to be process-global (oid counter, class registry,
//! permission cache) lives on the store value itself.
//!
//! ## Concurrency
//!
//! Every operation takes `&mut self`; backend I/O happens only at `.await`
//! points, so nothing else can observe a half-applied mutation.

mod acl;
mod commit;
mod fields;
mod load;
mod mutate;
mod query;

pub use query::NodeFilter;

use crate::event::{EventBus, EventKind, NodeEvent};
use crate::field::DataMap;
use crate::formats::decode_value;
use crate::node::Node;
use crate::permission::PermissionCache;
use crate::registry::{NodeKind, Registry};
use crate::storage::Storage;
use crate::tree::Tree;
use crate::types::{Oid, Result, SiptrackError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tunables of an [`ObjectStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Hydrate every node at load time instead of on first access.
    pub preload: bool,
    /// Allow access, with a warning, when no permission rule decides.
    pub permissive_acl: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            preload: true,
            permissive_acl: false,
        }
    }
}

/// The object tree bound to a storage backend.
pub struct ObjectStore {
    storage: Box<dyn Storage>,
    tree: Tree<Node>,
    registry: Registry,
    classes: BTreeMap<Oid, NodeKind>,
    permissions: PermissionCache,
    /// Removed nodes whose `remove_node` action is not committed yet.
    graveyard: BTreeMap<Oid, Node>,
    /// Set while preload hydrates nodes in bulk.
    loading: bool,
    options: StoreOptions,
    events: EventBus,
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("branches", &self.tree.len())
            .field("graveyard", &self.graveyard.len())
            .field("next_oid", &self.registry.next_oid())
            .field("options", &self.options)
            .finish()
    }
}

impl ObjectStore {
    fn empty(storage: Box<dyn Storage>, options: StoreOptions) -> Self {
        Self {
            storage,
            tree: Tree::new(),
            registry: Registry::standard(),
            classes: BTreeMap::new(),
            permissions: PermissionCache::new(),
            graveyard: BTreeMap::new(),
            loading: false,
            options,
            events: EventBus::new(),
        }
    }

    pub fn tree(&self) -> &Tree<Node> {
        &self.tree
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn permission_cache(&self) -> &PermissionCache {
        &self.permissions
    }

    /// Number of live branches.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn contains(&self, oid: Oid) -> bool {
        self.tree.contains(oid)
    }

    /// The materialized node, if it has been loaded.
    pub fn node(&self, oid: Oid) -> Option<&Node> {
        self.tree.ext(oid).or_else(|| self.graveyard.get(&oid))
    }

    /// Kind of a live node.
    pub fn kind_of(&self, oid: Oid) -> Result<NodeKind> {
        if !self.tree.contains(oid) {
            return Err(SiptrackError::NonExistent(oid.to_string()));
        }
        self.classes
            .get(&oid)
            .copied()
            .ok_or_else(|| SiptrackError::NonExistent(oid.to_string()))
    }

    /// Register a listener for node events.
    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: FnMut(&NodeEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener);
    }

    fn emit(&mut self, kind: EventKind, oid: Oid, class: NodeKind, other: Option<Oid>) {
        self.events.emit(kind, oid, class, other);
    }

    // =========================================================================
    // MATERIALIZATION
    // =========================================================================

    /// Bind a node to the branch of `oid` if none is bound yet.
    ///
    /// Outside of preload the node hydrates lazily, except an attribute's
    /// type, which decides whether its value may be cached.
    pub(crate) async fn materialize(&mut self, oid: Oid) -> Result<()> {
        let branch = self
            .tree
            .get(oid)
            .ok_or_else(|| SiptrackError::NonExistent(oid.to_string()))?;
        if branch.has_ext() {
            return Ok(());
        }
        let kind = self.kind_of(oid)?;
        let mut node = Node::skeleton(oid, kind);
        if !self.loading
            && kind == NodeKind::Attribute
            && let Some(bytes) = self.storage.read_data(oid, "atype").await?
        {
            let mut data = DataMap::new();
            data.insert("atype".to_string(), decode_value(&bytes)?);
            node.loaded(Some(&data))?;
        }
        self.tree.set_ext(oid, node)
    }

    /// The node of `oid`, materialized on demand.
    pub(crate) async fn node_mut(&mut self, oid: Oid) -> Result<&mut Node> {
        self.materialize(oid).await?;
        self.tree
            .ext_mut(oid)
            .ok_or_else(|| SiptrackError::NonExistent(oid.to_string()))
    }

    /// A live or removed-but-uncommitted node.
    fn journal_owner(&mut self, oid: Oid) -> Option<&mut Node> {
        if self.tree.ext(oid).is_some() {
            return self.tree.ext_mut(oid);
        }
        self.graveyard.get_mut(&oid)
    }
}
