//! Read-side helpers: node lookup, traversal, parents, attributes, users.

use super::ObjectStore;
use crate::node::Node;
use crate::permission::{Access, Principal};
use crate::primitives::VIEW_TREE_OID;
use crate::registry::NodeKind;
use crate::tree::FilterResult;
use crate::types::{Oid, Result, SiptrackError, Value};
use std::collections::BTreeSet;

// =============================================================================
// NODE FILTER
// =============================================================================

/// Kind-based traversal filter.
///
/// `exclude` wins over `include`; an empty `include` matches every kind.
/// With `no_match_break` a non-matching node also hides its subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFilter {
    include: Vec<NodeKind>,
    exclude: Vec<NodeKind>,
    no_match_break: bool,
}

impl NodeFilter {
    /// Matches everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn include(mut self, kinds: &[NodeKind]) -> Self {
        self.include.extend_from_slice(kinds);
        self
    }

    #[must_use]
    pub fn exclude(mut self, kinds: &[NodeKind]) -> Self {
        self.exclude.extend_from_slice(kinds);
        self
    }

    #[must_use]
    pub fn no_match_break(mut self, no_match_break: bool) -> Self {
        self.no_match_break = no_match_break;
        self
    }

    pub fn matches(&self, kind: NodeKind) -> bool {
        !self.exclude.contains(&kind) && (self.include.is_empty() || self.include.contains(&kind))
    }

    fn result(&self, kind: NodeKind) -> FilterResult {
        if self.matches(kind) {
            FilterResult::Match
        } else if self.no_match_break {
            FilterResult::Prune
        } else {
            FilterResult::NoMatch
        }
    }
}

// =============================================================================
// LOOKUP AND TRAVERSAL
// =============================================================================

impl ObjectStore {
    /// Resolve a node by oid.
    ///
    /// A kind outside `valid_kinds` (when non-empty) is reported exactly like
    /// a missing oid. With a `user`, read access is required.
    pub async fn get_oid(
        &mut self,
        oid: Oid,
        valid_kinds: &[NodeKind],
        user: Option<&Principal>,
    ) -> Result<&Node> {
        let kind = self.kind_of(oid)?;
        if !valid_kinds.is_empty() && !valid_kinds.contains(&kind) {
            return Err(SiptrackError::NonExistent(oid.to_string()));
        }
        self.require_access(oid, user, Access::Read).await?;
        self.materialize(oid).await?;
        self.tree
            .ext(oid)
            .ok_or_else(|| SiptrackError::NonExistent(oid.to_string()))
    }

    /// Depth-first walk below `oid`, yielding `(depth, oid)`.
    ///
    /// Nodes the `user` can't read are skipped along with their subtree.
    /// Depth 0 is the start node with `include_self`, its children
    /// otherwise; `max_depth = Some(0)` stops at that first level.
    pub async fn traverse(
        &mut self,
        oid: Oid,
        include_self: bool,
        max_depth: Option<usize>,
        filter: &NodeFilter,
        user: Option<&Principal>,
    ) -> Result<Vec<(usize, Oid)>> {
        self.kind_of(oid)?;
        let mut unreadable = BTreeSet::new();
        if user.is_some() {
            let reachable: Vec<Oid> = self
                .tree
                .traverse(Some(oid), true, None, |_| FilterResult::Match)
                .map(|(_, o)| o)
                .collect();
            for node in reachable {
                if !self.has_read_permission(node, user).await? {
                    unreadable.insert(node);
                }
            }
        }

        let classes = &self.classes;
        let tree = &self.tree;
        Ok(tree
            .traverse(Some(oid), include_self, max_depth, |b| {
                let removed = b.ext().is_some_and(Node::is_removed);
                match classes.get(&b.oid()) {
                    Some(_) if removed || unreadable.contains(&b.oid()) => FilterResult::Prune,
                    Some(kind) => filter.result(*kind),
                    None => FilterResult::Prune,
                }
            })
            .collect())
    }

    /// Direct children of `oid` passing `filter`.
    pub async fn list_children(&mut self, oid: Oid, filter: &NodeFilter) -> Result<Vec<Oid>> {
        Ok(self
            .traverse(oid, false, Some(0), filter, None)
            .await?
            .into_iter()
            .map(|(_, o)| o)
            .collect())
    }

    /// Associated and referencing nodes of `oid` passing `filter`.
    pub fn list_assoc_ref(&self, oid: Oid, filter: &NodeFilter) -> Result<Vec<Oid>> {
        let branch = self
            .tree
            .get(oid)
            .ok_or_else(|| SiptrackError::NonExistent(oid.to_string()))?;
        Ok(branch
            .associations()
            .iter()
            .chain(branch.references())
            .copied()
            .filter(|o| self.classes.get(o).is_some_and(|k| filter.matches(*k)))
            .collect())
    }

    // =========================================================================
    // PARENTS
    // =========================================================================

    /// Nearest node of `kind` above `oid`, or `oid` itself with
    /// `include_self`.
    pub fn get_parent(&self, oid: Oid, kind: NodeKind, include_self: bool) -> Option<Oid> {
        self.iter_parents(oid, include_self)
            .into_iter()
            .find(|o| self.classes.get(o) == Some(&kind))
    }

    /// Ancestors of `oid`, nearest first.
    pub fn iter_parents(&self, oid: Oid, include_self: bool) -> Vec<Oid> {
        let mut parents = Vec::new();
        if include_self && self.tree.contains(oid) {
            parents.push(oid);
        }
        parents.extend(self.tree.ancestors(oid));
        parents
    }

    // =========================================================================
    // ATTRIBUTES
    // =========================================================================

    /// The attribute named `name` attached directly to `oid`.
    pub async fn get_attribute(&mut self, oid: Oid, name: &str) -> Result<Option<Oid>> {
        let filter =
            NodeFilter::new().include(&[NodeKind::Attribute, NodeKind::VersionedAttribute]);
        for attr in self.list_children(oid, &filter).await? {
            if self.get_field(attr, "name").await?.as_text() == Some(name) {
                return Ok(Some(attr));
            }
        }
        Ok(None)
    }

    /// Value of the attribute `name` on `oid`, or `default` without one.
    pub async fn get_attribute_value(
        &mut self,
        oid: Oid,
        name: &str,
        default: Value,
    ) -> Result<Value> {
        match self.get_attribute(oid, name).await? {
            Some(attr) => self.attribute_value(attr).await,
            None => Ok(default),
        }
    }

    // =========================================================================
    // USERS
    // =========================================================================

    /// The active user manager, as referenced by the view tree.
    pub async fn user_manager(&mut self) -> Result<Option<Oid>> {
        Ok(self
            .get_field(VIEW_TREE_OID, "user_manager")
            .await?
            .as_ref_oid())
    }

    /// Find a local user by name in the active user manager.
    pub async fn find_user(&mut self, username: &str) -> Result<Option<Oid>> {
        let Some(manager) = self.user_manager().await? else {
            return Ok(None);
        };
        let filter = NodeFilter::new().include(&[NodeKind::UserLocal]);
        for user in self.list_children(manager, &filter).await? {
            if self.get_field(user, "username").await?.as_text() == Some(username) {
                return Ok(Some(user));
            }
        }
        Ok(None)
    }

    /// The principal acting as user node `user`.
    pub async fn principal_for(&mut self, user: Oid) -> Result<Principal> {
        if self.kind_of(user)? != NodeKind::UserLocal {
            return Err(SiptrackError::NonExistent(user.to_string()));
        }
        let administrator = self
            .get_field(user, "administrator")
            .await?
            .as_bool()
            .unwrap_or(false);
        Ok(Principal::new(user, administrator))
    }
}
