//! # Object Registry
//!
//! The schema catalog and oid allocator.
//!
//! Node kinds form a closed set ([`NodeKind`]). A [`Registry`] records, per
//! kind, which kinds may be created as its direct children, and hands out
//! oids from a single monotonic counter. [`Registry::create_object`] is the
//! only way a new branch + node pair comes into existence, and it leaves no
//! trace when construction fails.

use crate::node::{Node, NodeArgs};
use crate::tree::Tree;
use crate::types::{Oid, Result, SiptrackError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::warn;

// =============================================================================
// NODE KINDS
// =============================================================================

/// Every node class the store knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    ViewTree,
    View,
    DeviceTree,
    DeviceCategory,
    Device,
    ContainerTree,
    Container,
    Counter,
    Attribute,
    VersionedAttribute,
    Permission,
    UserManagerLocal,
    UserLocal,
    UserGroup,
}

impl NodeKind {
    pub const ALL: [NodeKind; 14] = [
        NodeKind::ViewTree,
        NodeKind::View,
        NodeKind::DeviceTree,
        NodeKind::DeviceCategory,
        NodeKind::Device,
        NodeKind::ContainerTree,
        NodeKind::Container,
        NodeKind::Counter,
        NodeKind::Attribute,
        NodeKind::VersionedAttribute,
        NodeKind::Permission,
        NodeKind::UserManagerLocal,
        NodeKind::UserLocal,
        NodeKind::UserGroup,
    ];

    /// Short persisted type tag.
    pub fn class_id(self) -> &'static str {
        match self {
            NodeKind::ViewTree => "VT",
            NodeKind::View => "V",
            NodeKind::DeviceTree => "DT",
            NodeKind::DeviceCategory => "DC",
            NodeKind::Device => "D",
            NodeKind::ContainerTree => "CT",
            NodeKind::Container => "C",
            NodeKind::Counter => "CNT",
            NodeKind::Attribute => "CA",
            NodeKind::VersionedAttribute => "VA",
            NodeKind::Permission => "PERM",
            NodeKind::UserManagerLocal => "UM",
            NodeKind::UserLocal => "U",
            NodeKind::UserGroup => "UG",
        }
    }

    /// Human-facing class name, as used by `add`.
    pub fn class_name(self) -> &'static str {
        match self {
            NodeKind::ViewTree => "view tree",
            NodeKind::View => "view",
            NodeKind::DeviceTree => "device tree",
            NodeKind::DeviceCategory => "device category",
            NodeKind::Device => "device",
            NodeKind::ContainerTree => "container tree",
            NodeKind::Container => "container",
            NodeKind::Counter => "counter",
            NodeKind::Attribute => "attribute",
            NodeKind::VersionedAttribute => "versioned attribute",
            NodeKind::Permission => "permission",
            NodeKind::UserManagerLocal => "user manager local",
            NodeKind::UserLocal => "user local",
            NodeKind::UserGroup => "user group",
        }
    }

    pub fn from_class_id(class_id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.class_id() == class_id)
    }

    pub fn from_class_name(class_name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.class_name() == class_name)
    }

    /// Only administrators may read or write nodes of this kind.
    pub fn requires_admin(self) -> bool {
        matches!(self, NodeKind::Permission)
    }

    pub fn is_attribute(self) -> bool {
        matches!(self, NodeKind::Attribute | NodeKind::VersionedAttribute)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_name())
    }
}

// =============================================================================
// SCHEMA
// =============================================================================

/// Schema entry for one registered kind.
#[derive(Debug, Clone, Default)]
pub struct ClassSchema {
    children: BTreeSet<NodeKind>,
}

impl ClassSchema {
    /// Declare `child` as a permitted direct child.
    pub fn register_child(&mut self, child: NodeKind) -> &mut Self {
        self.children.insert(child);
        self
    }

    pub fn children(&self) -> impl Iterator<Item = NodeKind> + '_ {
        self.children.iter().copied()
    }
}

/// Schema catalog plus the process-wide oid counter.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    classes: BTreeMap<NodeKind, ClassSchema>,
    next_oid: u64,
}

impl Registry {
    /// An empty registry with no classes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with every built-in kind and its permitted children.
    #[must_use]
    pub fn standard() -> Self {
        use NodeKind::*;

        let mut registry = Self::new();
        registry
            .register_class(ViewTree)
            .register_child(View)
            .register_child(UserManagerLocal);
        registry
            .register_class(View)
            .register_child(DeviceTree)
            .register_child(ContainerTree)
            .register_child(Counter);
        registry
            .register_class(DeviceTree)
            .register_child(Device)
            .register_child(DeviceCategory);
        registry
            .register_class(DeviceCategory)
            .register_child(Device)
            .register_child(DeviceCategory);
        registry.register_class(Device).register_child(Device);
        registry.register_class(ContainerTree).register_child(Container);
        registry.register_class(Container).register_child(Container);
        registry.register_class(Counter);
        registry.register_class(Attribute);
        registry.register_class(VersionedAttribute);
        registry.register_class(Permission);
        registry
            .register_class(UserManagerLocal)
            .register_child(UserLocal)
            .register_child(UserGroup);
        registry.register_class(UserLocal);
        registry.register_class(UserGroup);

        // Attributes hang off everything, permissions off the tree proper.
        for kind in NodeKind::ALL {
            let schema = registry.register_class(kind);
            schema.register_child(Attribute).register_child(VersionedAttribute);
            if !matches!(
                kind,
                Attribute | VersionedAttribute | Permission | UserManagerLocal | UserLocal | UserGroup
            ) {
                schema.register_child(Permission);
            }
        }
        registry
    }

    /// Register a kind (idempotent) and return its schema for child
    /// declarations.
    pub fn register_class(&mut self, kind: NodeKind) -> &mut ClassSchema {
        self.classes.entry(kind).or_default()
    }

    pub fn is_registered(&self, kind: NodeKind) -> bool {
        self.classes.contains_key(&kind)
    }

    pub fn schema(&self, kind: NodeKind) -> Option<&ClassSchema> {
        self.classes.get(&kind)
    }

    pub fn is_valid_child(&self, parent: NodeKind, child: NodeKind) -> bool {
        self.classes
            .get(&parent)
            .is_some_and(|s| s.children.contains(&child))
    }

    /// Resolve a registered kind from its class name.
    pub fn kind_by_name(&self, class_name: &str) -> Result<NodeKind> {
        NodeKind::from_class_name(class_name)
            .filter(|k| self.is_registered(*k))
            .ok_or_else(|| {
                SiptrackError::InvalidOperation(format!(
                    "trying to create child of invalid type '{class_name}'"
                ))
            })
    }

    // =========================================================================
    // OID ALLOCATION
    // =========================================================================

    pub fn next_oid(&self) -> u64 {
        self.next_oid
    }

    pub fn set_next_oid(&mut self, next: u64) {
        self.next_oid = next;
    }

    pub fn allocate_oid(&mut self) -> Oid {
        let oid = Oid(self.next_oid);
        self.next_oid = self.next_oid.saturating_add(1);
        oid
    }

    /// Undo the most recent allocation.
    ///
    /// Only the latest oid can be handed back; anything older may already
    /// have been observed and is left consumed. Returns whether the counter
    /// moved.
    pub fn revert_oid(&mut self, oid: Oid) -> bool {
        if self.next_oid == oid.0.saturating_add(1) {
            self.next_oid = oid.0;
            true
        } else {
            false
        }
    }

    // =========================================================================
    // OBJECT CREATION
    // =========================================================================

    /// Allocate an oid, create its branch under `parent` and construct the
    /// node from `args`.
    ///
    /// On constructor failure the branch is removed and the oid reverted.
    pub fn create_object(
        &mut self,
        tree: &mut Tree<Node>,
        kind: NodeKind,
        parent: Option<Oid>,
        args: NodeArgs,
    ) -> Result<Oid> {
        if !self.is_registered(kind) {
            return Err(SiptrackError::InvalidOperation(format!(
                "unknown class id '{}'",
                kind.class_id()
            )));
        }
        let oid = self.allocate_oid();
        if let Err(e) = tree.add_branch(parent, oid) {
            self.revert_oid(oid);
            return Err(e);
        }
        match Node::construct(oid, kind, args) {
            Ok(node) => {
                tree.set_ext(oid, node)?;
                Ok(oid)
            }
            Err(e) => {
                self.rollback(tree, oid);
                Err(e)
            }
        }
    }

    /// Remove a just-created branch and hand its oid back.
    pub fn rollback(&mut self, tree: &mut Tree<Node>, oid: Oid) {
        // Only ever called on a fresh leaf, so nothing is adopted.
        if let Err(e) = tree.remove(oid, false) {
            warn!(oid = %oid, error = %e, "rollback could not remove branch");
        }
        self.revert_oid(oid);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn class_ids_and_names_round_trip() {
        for kind in NodeKind::ALL {
            assert_eq!(NodeKind::from_class_id(kind.class_id()), Some(kind));
            assert_eq!(NodeKind::from_class_name(kind.class_name()), Some(kind));
        }
        assert_eq!(NodeKind::from_class_name("network"), None);
    }

    #[test]
    fn standard_schema_matches_hierarchy() {
        let registry = Registry::standard();
        assert!(registry.is_valid_child(NodeKind::ViewTree, NodeKind::View));
        assert!(registry.is_valid_child(NodeKind::View, NodeKind::DeviceTree));
        assert!(registry.is_valid_child(NodeKind::DeviceTree, NodeKind::Device));
        assert!(registry.is_valid_child(NodeKind::Device, NodeKind::Attribute));
        assert!(registry.is_valid_child(NodeKind::Device, NodeKind::Permission));
        assert!(registry.is_valid_child(NodeKind::Attribute, NodeKind::Attribute));

        assert!(!registry.is_valid_child(NodeKind::ViewTree, NodeKind::Device));
        assert!(!registry.is_valid_child(NodeKind::Attribute, NodeKind::Permission));
        assert!(!registry.is_valid_child(NodeKind::UserLocal, NodeKind::Permission));
        assert!(!registry.is_valid_child(NodeKind::Device, NodeKind::View));
    }

    #[test]
    fn kind_by_name_rejects_unregistered() {
        let mut registry = Registry::new();
        registry.register_class(NodeKind::View);
        assert_eq!(registry.kind_by_name("view"), Ok(NodeKind::View));
        assert!(matches!(
            registry.kind_by_name("device"),
            Err(SiptrackError::InvalidOperation(_))
        ));
    }

    #[test]
    fn revert_only_undoes_latest_allocation() {
        let mut registry = Registry::new();
        let a = registry.allocate_oid();
        let b = registry.allocate_oid();
        assert!(!registry.revert_oid(a));
        assert!(registry.revert_oid(b));
        assert_eq!(registry.allocate_oid(), b);
    }

    #[test]
    fn create_object_rolls_back_on_constructor_failure() {
        let mut registry = Registry::standard();
        let mut tree = Tree::new();
        let root = registry
            .create_object(&mut tree, NodeKind::ViewTree, None, NodeArgs::new())
            .expect("view tree");

        let bad = NodeArgs::new()
            .with("name", "hostname")
            .with("atype", "colour")
            .with("value", "red");
        let err = registry
            .create_object(&mut tree, NodeKind::Attribute, Some(root), bad)
            .expect_err("invalid atype");
        assert!(matches!(err, SiptrackError::InvalidData(_)));
        assert_eq!(tree.len(), 1);
        assert!(tree.get(root).expect("root").children().is_empty());
        assert_eq!(registry.next_oid(), 1);

        let ok = NodeArgs::new()
            .with("name", "hostname")
            .with("atype", "text")
            .with("value", Value::from("sw1"));
        let oid = registry
            .create_object(&mut tree, NodeKind::Attribute, Some(root), ok)
            .expect("attribute");
        assert_eq!(oid, Oid(1));
    }

    #[test]
    fn rollback_of_a_missing_branch_still_returns_the_oid() {
        let mut registry = Registry::standard();
        let mut tree: Tree<Node> = Tree::new();
        let oid = registry.allocate_oid();
        assert!(!tree.contains(oid));

        registry.rollback(&mut tree, oid);
        assert_eq!(registry.next_oid(), 0);
        assert!(tree.is_empty());
    }

    #[test]
    fn create_object_rejects_unregistered_kind() {
        let mut registry = Registry::new();
        let mut tree = Tree::new();
        assert!(
            registry
                .create_object(&mut tree, NodeKind::View, None, NodeArgs::new())
                .is_err()
        );
        assert_eq!(registry.next_oid(), 0);
    }
}
