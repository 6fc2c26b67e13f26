//! # Branch Tree
//!
//! An in-memory arena of branches keyed by oid.
//!
//! Every branch has exactly one owner (its parent, or the tree root when
//! `parent` is `None`), an ordered child list, and two auxiliary edge sets:
//! outgoing `associations` and the inverse `references`. All links are oid
//! handles into the arena, never live pointers.
//!
//! ## Invariants
//!
//! - `b ∈ a.associations ⇔ a ∈ b.references`
//! - Every oid appears at most once in the arena.
//! - Every branch is listed in exactly one child list (its parent's, or
//!   the root list).

use crate::types::{Oid, Result, SiptrackError};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

// =============================================================================
// BRANCH
// =============================================================================

/// A single node of the structural graph.
///
/// `ext` holds the bound domain object once it has been materialized.
#[derive(Debug, Clone)]
pub struct Branch<T> {
    oid: Oid,
    parent: Option<Oid>,
    children: Vec<Oid>,
    associations: Vec<Oid>,
    references: Vec<Oid>,
    ext: Option<T>,
}

impl<T> Branch<T> {
    fn new(oid: Oid, parent: Option<Oid>) -> Self {
        Self {
            oid,
            parent,
            children: Vec::new(),
            associations: Vec::new(),
            references: Vec::new(),
            ext: None,
        }
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// The owning branch, `None` for top-level branches.
    pub fn parent(&self) -> Option<Oid> {
        self.parent
    }

    pub fn children(&self) -> &[Oid] {
        &self.children
    }

    pub fn associations(&self) -> &[Oid] {
        &self.associations
    }

    pub fn references(&self) -> &[Oid] {
        &self.references
    }

    pub fn ext(&self) -> Option<&T> {
        self.ext.as_ref()
    }

    pub fn has_ext(&self) -> bool {
        self.ext.is_some()
    }
}

/// Outcome of a traversal filter for one branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResult {
    /// Yield the branch and keep descending.
    Match,
    /// Skip the branch but keep descending.
    NoMatch,
    /// Skip the branch and its whole subtree.
    Prune,
}

/// A branch detached by [`Tree::remove`].
#[derive(Debug)]
pub struct Removed<T> {
    pub oid: Oid,
    /// Owner at the time of removal.
    pub parent: Option<Oid>,
    pub ext: Option<T>,
    /// Children handed over to `parent`.
    pub adopted: Vec<Oid>,
}

// =============================================================================
// TREE
// =============================================================================

/// The branch arena.
#[derive(Debug, Clone)]
pub struct Tree<T> {
    branches: BTreeMap<Oid, Branch<T>>,
    roots: Vec<Oid>,
}

impl<T> Default for Tree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Tree<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            branches: BTreeMap::new(),
            roots: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    pub fn contains(&self, oid: Oid) -> bool {
        self.branches.contains_key(&oid)
    }

    pub fn get(&self, oid: Oid) -> Option<&Branch<T>> {
        self.branches.get(&oid)
    }

    /// Top-level branches, in insertion order.
    pub fn roots(&self) -> &[Oid] {
        &self.roots
    }

    pub fn oids(&self) -> impl Iterator<Item = Oid> + '_ {
        self.branches.keys().copied()
    }

    pub fn ext(&self, oid: Oid) -> Option<&T> {
        self.branches.get(&oid).and_then(|b| b.ext.as_ref())
    }

    pub fn ext_mut(&mut self, oid: Oid) -> Option<&mut T> {
        self.branches.get_mut(&oid).and_then(|b| b.ext.as_mut())
    }

    /// Bind a domain object to an existing branch.
    pub fn set_ext(&mut self, oid: Oid, ext: T) -> Result<()> {
        let branch = self
            .branches
            .get_mut(&oid)
            .ok_or_else(|| SiptrackError::NonExistent(oid.to_string()))?;
        branch.ext = Some(ext);
        Ok(())
    }

    /// Temporarily detach a branch's domain object.
    ///
    /// The branch stays in place; pair with [`Tree::set_ext`].
    pub fn take_ext(&mut self, oid: Oid) -> Option<T> {
        self.branches.get_mut(&oid).and_then(|b| b.ext.take())
    }

    pub fn parent_of(&self, oid: Oid) -> Option<Oid> {
        self.branches.get(&oid).and_then(|b| b.parent)
    }

    /// Ancestors of `oid`, nearest first.
    pub fn ancestors(&self, oid: Oid) -> Vec<Oid> {
        let mut out = Vec::new();
        let mut current = self.parent_of(oid);
        while let Some(p) = current {
            out.push(p);
            current = self.parent_of(p);
        }
        out
    }

    /// True if `oid` lies in the subtree below `ancestor`.
    pub fn is_descendant(&self, ancestor: Oid, oid: Oid) -> bool {
        let mut current = self.parent_of(oid);
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.parent_of(p);
        }
        false
    }

    fn child_list_mut(&mut self, parent: Option<Oid>) -> Option<&mut Vec<Oid>> {
        match parent {
            None => Some(&mut self.roots),
            Some(p) => self.branches.get_mut(&p).map(|b| &mut b.children),
        }
    }

    // =========================================================================
    // STRUCTURE
    // =========================================================================

    /// Create a branch under `parent` (`None` attaches it to the root).
    pub fn add_branch(&mut self, parent: Option<Oid>, oid: Oid) -> Result<()> {
        if self.contains(oid) {
            return Err(SiptrackError::AlreadyExists(format!(
                "a branch with oid {oid} already exists"
            )));
        }
        let siblings = self
            .child_list_mut(parent)
            .ok_or_else(|| SiptrackError::NonExistent(format!("parent of {oid}")))?;
        siblings.push(oid);
        self.branches.insert(oid, Branch::new(oid, parent));
        Ok(())
    }

    /// Remove a branch.
    ///
    /// Non-recursive removal hands the branch's children to its parent.
    /// Recursive removal visits the subtree deepest-first so each branch is
    /// detached only after all of its descendants.
    pub fn remove(&mut self, oid: Oid, recursive: bool) -> Result<Vec<Removed<T>>> {
        if !self.contains(oid) {
            return Err(SiptrackError::NonExistent(oid.to_string()));
        }
        let order = if recursive {
            self.traverse_reverse(Some(oid), true)
        } else {
            vec![oid]
        };
        let mut removed = Vec::with_capacity(order.len());
        for target in order {
            if let Some(r) = self.remove_single(target) {
                removed.push(r);
            }
        }
        Ok(removed)
    }

    fn remove_single(&mut self, oid: Oid) -> Option<Removed<T>> {
        let branch = self.branches.remove(&oid)?;

        for child in &branch.children {
            if let Some(c) = self.branches.get_mut(child) {
                c.parent = branch.parent;
            }
        }
        if let Some(siblings) = self.child_list_mut(branch.parent) {
            siblings.extend(branch.children.iter().copied());
            siblings.retain(|o| *o != oid);
        }

        for other in &branch.associations {
            if let Some(b) = self.branches.get_mut(other) {
                b.references.retain(|o| *o != oid);
            }
        }
        for other in &branch.references {
            if let Some(b) = self.branches.get_mut(other) {
                b.associations.retain(|o| *o != oid);
            }
        }

        Some(Removed {
            oid,
            parent: branch.parent,
            ext: branch.ext,
            adopted: branch.children,
        })
    }

    /// Give a branch a new parent.
    pub fn relocate(&mut self, oid: Oid, new_parent: Option<Oid>) -> Result<()> {
        let old_parent = self
            .get(oid)
            .ok_or_else(|| SiptrackError::NonExistent(oid.to_string()))?
            .parent;
        if let Some(p) = new_parent {
            if !self.contains(p) {
                return Err(SiptrackError::NonExistent(p.to_string()));
            }
            if p == oid {
                return Err(SiptrackError::InvalidOperation(
                    "a branch can't be its own parent".to_string(),
                ));
            }
            if self.is_descendant(oid, p) {
                return Err(SiptrackError::InvalidOperation(
                    "can't relocate to a child".to_string(),
                ));
            }
        }
        if let Some(siblings) = self.child_list_mut(old_parent) {
            siblings.retain(|o| *o != oid);
        }
        if let Some(siblings) = self.child_list_mut(new_parent) {
            siblings.push(oid);
        }
        if let Some(b) = self.branches.get_mut(&oid) {
            b.parent = new_parent;
        }
        Ok(())
    }

    // =========================================================================
    // ASSOCIATIONS
    // =========================================================================

    pub fn is_associated(&self, oid: Oid, other: Oid) -> bool {
        self.get(oid)
            .is_some_and(|b| b.associations.contains(&other))
    }

    /// Create the edge `oid → other` and its inverse reference.
    pub fn associate(&mut self, oid: Oid, other: Oid) -> Result<()> {
        if oid == other {
            return Err(SiptrackError::InvalidOperation(
                "can't associate an object with itself".to_string(),
            ));
        }
        if !self.contains(other) {
            return Err(SiptrackError::NonExistent(other.to_string()));
        }
        let branch = self
            .branches
            .get_mut(&oid)
            .ok_or_else(|| SiptrackError::NonExistent(oid.to_string()))?;
        if branch.associations.contains(&other) {
            return Err(SiptrackError::InvalidOperation(
                "objects already associated".to_string(),
            ));
        }
        branch.associations.push(other);
        if let Some(b) = self.branches.get_mut(&other) {
            b.references.push(oid);
        }
        Ok(())
    }

    pub fn disassociate(&mut self, oid: Oid, other: Oid) -> Result<()> {
        if !self.is_associated(oid, other) {
            return Err(SiptrackError::InvalidOperation(
                "objects not associated".to_string(),
            ));
        }
        if let Some(b) = self.branches.get_mut(&oid) {
            b.associations.retain(|o| *o != other);
        }
        if let Some(b) = self.branches.get_mut(&other) {
            b.references.retain(|o| *o != oid);
        }
        Ok(())
    }

    // =========================================================================
    // TRAVERSAL
    // =========================================================================

    /// Lazy depth-first traversal yielding `(depth, oid)`.
    ///
    /// `start = None` walks from the tree root (which is never yielded).
    /// `max_depth = None` is unbounded; with `include_root` the start branch
    /// sits at depth 0 and its children at depth 1.
    pub fn traverse<F>(
        &self,
        start: Option<Oid>,
        include_root: bool,
        max_depth: Option<usize>,
        filter: F,
    ) -> Traverse<'_, T, F>
    where
        F: FnMut(&Branch<T>) -> FilterResult,
    {
        Traverse {
            tree: self,
            start,
            include_root,
            max_depth,
            filter,
            started: false,
            current: None,
            stack: Vec::new(),
            depth: 0,
        }
    }

    /// Post-order walk: leaves first, every branch after its subtree.
    pub fn traverse_reverse(&self, start: Option<Oid>, include_root: bool) -> Vec<Oid> {
        let children: &[Oid] = match start {
            None => &self.roots,
            Some(oid) => match self.get(oid) {
                Some(b) => &b.children,
                None => return Vec::new(),
            },
        };
        let mut stack: Vec<Oid> = children.to_vec();
        let mut order = Vec::new();
        while let Some(oid) = stack.pop() {
            order.push(oid);
            if let Some(b) = self.get(oid) {
                stack.extend(b.children.iter().copied());
            }
        }
        order.reverse();
        if include_root && let Some(oid) = start {
            order.push(oid);
        }
        order
    }

    // =========================================================================
    // BULK LOAD / TEARDOWN
    // =========================================================================

    /// Bulk insertion of `(parent, oid)` pairs from storage.
    ///
    /// Pairs may arrive in any order. Branches whose parent chain never
    /// reaches the root are dropped with a warning; their oids are returned.
    pub fn load_branches<I>(&mut self, pairs: I) -> Result<Vec<Oid>>
    where
        I: IntoIterator<Item = (Option<Oid>, Oid)>,
    {
        let mut pending = Vec::new();
        for (parent, oid) in pairs {
            if self.contains(oid) {
                return Err(SiptrackError::AlreadyExists(format!(
                    "a branch with oid {oid} already exists"
                )));
            }
            self.branches.insert(oid, Branch::new(oid, parent));
            pending.push((parent, oid));
        }

        for (parent, oid) in &pending {
            match parent {
                None => self.roots.push(*oid),
                Some(p) => match self.branches.get_mut(p) {
                    Some(b) => b.children.push(*oid),
                    None => warn!(parent = %p, oid = %oid, "unable to locate parent"),
                },
            }
        }

        let reachable: BTreeSet<Oid> = self.traverse_reverse(None, false).into_iter().collect();
        let orphans: Vec<Oid> = self
            .branches
            .keys()
            .copied()
            .filter(|oid| !reachable.contains(oid))
            .collect();
        for oid in &orphans {
            warn!(oid = %oid, "dropping branch unreachable from the root");
            self.branches.remove(oid);
        }
        Ok(orphans)
    }

    /// Bulk insertion of `(oid, associated_oid)` pairs; returns how many
    /// pairs were skipped.
    pub fn load_associations<I>(&mut self, pairs: I) -> usize
    where
        I: IntoIterator<Item = (Oid, Oid)>,
    {
        let mut skipped = 0;
        for (oid, other) in pairs {
            if let Err(e) = self.associate(oid, other) {
                warn!(oid = %oid, other = %other, error = %e, "skipping association");
                skipped += 1;
            }
        }
        skipped
    }

    /// Tear down the whole tree deepest-first; returns the number of
    /// branches released.
    pub fn free(&mut self) -> usize {
        let order = self.traverse_reverse(None, false);
        let mut count = 0;
        for oid in order {
            if self.branches.remove(&oid).is_some() {
                count += 1;
            }
        }
        count += self.branches.len();
        self.branches.clear();
        self.roots.clear();
        count
    }
}

// =============================================================================
// TRAVERSE ITERATOR
// =============================================================================

/// Iterator returned by [`Tree::traverse`].
pub struct Traverse<'a, T, F> {
    tree: &'a Tree<T>,
    start: Option<Oid>,
    include_root: bool,
    max_depth: Option<usize>,
    filter: F,
    started: bool,
    current: Option<std::slice::Iter<'a, Oid>>,
    stack: Vec<std::slice::Iter<'a, Oid>>,
    depth: usize,
}

impl<'a, T, F> Traverse<'a, T, F>
where
    F: FnMut(&Branch<T>) -> FilterResult,
{
    /// Set up the child iterator of the start branch; may yield the start
    /// branch itself.
    fn begin(&mut self) -> Option<(usize, Oid)> {
        let tree = self.tree;
        let children: &'a [Oid] = match self.start {
            None => &tree.roots,
            Some(oid) => &tree.get(oid)?.children,
        };

        let mut first = None;
        if self.include_root
            && let Some(oid) = self.start
        {
            let branch = tree.get(oid)?;
            match (self.filter)(branch) {
                FilterResult::Prune => return None,
                FilterResult::Match => first = Some((0, oid)),
                FilterResult::NoMatch => {}
            }
            self.depth = 1;
        }

        if self.max_depth.is_none_or(|max| self.depth <= max) {
            self.current = Some(children.iter());
        }
        first
    }
}

impl<T, F> Iterator for Traverse<'_, T, F>
where
    F: FnMut(&Branch<T>) -> FilterResult,
{
    type Item = (usize, Oid);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
            if let Some(first) = self.begin() {
                return Some(first);
            }
        }

        let tree = self.tree;
        loop {
            let current = self.current.as_mut()?;
            let Some(&oid) = current.next() else {
                match self.stack.pop() {
                    Some(parent_iter) => {
                        *current = parent_iter;
                        self.depth = self.depth.saturating_sub(1);
                        continue;
                    }
                    None => {
                        self.current = None;
                        return None;
                    }
                }
            };
            let Some(branch) = tree.get(oid) else {
                continue;
            };

            let depth = self.depth;
            let result = (self.filter)(branch);
            let descend = !branch.children.is_empty()
                && result != FilterResult::Prune
                && self.max_depth.is_none_or(|max| depth < max);
            if descend {
                let parent_iter = std::mem::replace(current, branch.children.iter());
                self.stack.push(parent_iter);
                self.depth += 1;
            }
            if result == FilterResult::Match {
                return Some((depth, oid));
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
