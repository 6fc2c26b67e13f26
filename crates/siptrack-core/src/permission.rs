//! # Permission Model
//!
//! Per-node memo of applicable ACL entries and the rules that turn them
//! into an access decision.
//!
//! The cache maps an oid to the ordered list of permission nodes that
//! apply to it: recursive permissions inherited from ancestors first, then
//! the node's own directly attached permission children. It is filled
//! lazily, parent before child, by the object store and flushed as a whole
//! whenever any permission node changes.

use crate::registry::NodeKind;
use crate::types::Oid;
use std::collections::BTreeMap;
use tracing::warn;

/// The user an operation runs as.
///
/// Operations take `Option<&Principal>`; `None` means the store itself,
/// which is never denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    /// Oid of the user node.
    pub user: Oid,
    pub administrator: bool,
}

impl Principal {
    #[must_use]
    pub fn new(user: Oid, administrator: bool) -> Self {
        Self {
            user,
            administrator,
        }
    }
}

/// Which access flag a check consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    pub fn as_str(self) -> &'static str {
        match self {
            Access::Read => "read",
            Access::Write => "write",
        }
    }
}

/// A permission node with its fields resolved for matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionRule {
    pub oid: Oid,
    pub read_access: bool,
    pub write_access: bool,
    pub all_users: bool,
    pub users: Vec<Oid>,
    /// Members of every listed group, one level deep.
    pub group_users: Vec<Oid>,
}

impl PermissionRule {
    pub fn matches_user(&self, user: Oid) -> bool {
        self.all_users || self.users.contains(&user) || self.group_users.contains(&user)
    }

    pub fn grants(&self, access: Access) -> bool {
        match access {
            Access::Read => self.read_access,
            Access::Write => self.write_access,
        }
    }
}

// =============================================================================
// CACHE
// =============================================================================

/// oid → applicable permission nodes, in evaluation order.
#[derive(Debug, Clone, Default)]
pub struct PermissionCache {
    entries: BTreeMap<Oid, Vec<Oid>>,
}

impl PermissionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_warm(&self, oid: Oid) -> bool {
        self.entries.contains_key(&oid)
    }

    /// Cached permissions of `oid`; empty when cold.
    pub fn get(&self, oid: Oid) -> &[Oid] {
        self.entries.get(&oid).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn insert(&mut self, oid: Oid, permissions: Vec<Oid>) {
        self.entries.insert(oid, permissions);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// DECISION
// =============================================================================

/// Decide whether `principal` may access node `oid` of kind `kind`.
///
/// `rules` are the node's cached permissions in order; the first one that
/// matches the user decides. With no decision the result is `permissive`.
pub fn evaluate(
    principal: Option<&Principal>,
    oid: Oid,
    kind: NodeKind,
    rules: &[PermissionRule],
    access: Access,
    permissive: bool,
) -> bool {
    let Some(principal) = principal else {
        return true;
    };
    if principal.administrator {
        return true;
    }
    if kind.requires_admin() {
        return false;
    }
    if oid == principal.user {
        return true;
    }
    if let Some(rule) = rules.iter().find(|r| r.matches_user(principal.user))
        && rule.grants(access)
    {
        return true;
    }
    if permissive {
        warn!(
            node = %oid,
            user = %principal.user,
            access = access.as_str(),
            "permission check failed, permitting anyway"
        );
    }
    permissive
}
