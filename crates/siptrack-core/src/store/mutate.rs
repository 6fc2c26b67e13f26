//! Structural mutations: add, remove, relocate, associate.

use super::ObjectStore;
use crate::event::EventKind;
use crate::journal::StorageAction;
use crate::node::NodeArgs;
use crate::permission::{Access, Principal};
use crate::primitives::VIEW_TREE_OID;
use crate::registry::NodeKind;
use crate::types::{Oid, Result, SiptrackError};
use tracing::debug;

fn push_unique(list: &mut Vec<Oid>, oid: Oid) {
    if !list.contains(&oid) {
        list.push(oid);
    }
}

impl ObjectStore {
    /// Create a node of class `class_name` under `parent`.
    ///
    /// Schema, admin-only kinds, write permission on `parent` and field
    /// values are all checked before an oid is allocated.
    pub async fn add(
        &mut self,
        parent: Oid,
        class_name: &str,
        args: NodeArgs,
        user: Option<&Principal>,
    ) -> Result<Oid> {
        let parent_kind = self.kind_of(parent)?;
        let kind = self.registry.kind_by_name(class_name)?;
        if !self.registry.is_valid_child(parent_kind, kind) {
            return Err(SiptrackError::InvalidOperation(format!(
                "trying to create child of invalid type '{class_name}' under '{}'",
                parent_kind.class_name()
            )));
        }
        if kind.requires_admin() && !user.is_none_or(|u| u.administrator) {
            return Err(SiptrackError::PermissionDenied);
        }
        self.require_access(parent, user, Access::Write).await?;
        for (name, value) in args.iter() {
            self.validate_field(Some(parent), None, kind, name, value)
                .await?;
        }

        let oid = self
            .registry
            .create_object(&mut self.tree, kind, Some(parent), args)?;
        let created = match self.tree.ext_mut(oid) {
            Some(node) => node.created(Some(parent)),
            None => Err(SiptrackError::NonExistent(oid.to_string())),
        };
        if let Err(e) = created {
            self.registry.rollback(&mut self.tree, oid);
            return Err(e);
        }

        self.classes.insert(oid, kind);
        if kind == NodeKind::Permission {
            self.permissions.clear();
        }
        debug!(oid = %oid, class = %kind, parent = %parent, "node added");
        self.emit(EventKind::NodeAdd, oid, kind, Some(parent));
        Ok(oid)
    }

    /// Remove a node, and with `recursive` its whole subtree.
    ///
    /// Without `recursive` the node's children are handed to its parent.
    /// Returns every node with newly queued actions; commit them to
    /// persist the removal.
    pub async fn remove(
        &mut self,
        oid: Oid,
        recursive: bool,
        user: Option<&Principal>,
    ) -> Result<Vec<Oid>> {
        if oid == VIEW_TREE_OID {
            return Err(SiptrackError::InvalidOperation(
                "the view tree can't be removed".to_string(),
            ));
        }
        self.kind_of(oid)?;
        let order = if recursive {
            self.tree.traverse_reverse(Some(oid), true)
        } else {
            vec![oid]
        };
        for target in &order {
            self.require_access(*target, user, Access::Write).await?;
        }

        let mut affected = Vec::new();
        let mut acl_changed = false;
        for target in order {
            let kind = self.kind_of(target)?;
            acl_changed |= kind == NodeKind::Permission;
            self.sever(target, kind, &mut affected).await?;

            for removed in self.tree.remove(target, false)? {
                // Adopted subtrees inherit from a new parent.
                acl_changed |= !removed.adopted.is_empty();
                for child in &removed.adopted {
                    let node = self.node_mut(*child).await?;
                    node.journal_mut().push(StorageAction::Relocate {
                        parent: removed.parent,
                    });
                    node.journal_mut().touch();
                    push_unique(&mut affected, *child);
                }
                if let Some(mut node) = removed.ext {
                    node.mark_removed();
                    self.graveyard.insert(removed.oid, node);
                }
            }
            self.classes.remove(&target);
            debug!(oid = %target, class = %kind, "node removed");
            self.emit(EventKind::NodeRemove, target, kind, None);
            push_unique(&mut affected, target);
        }

        if acl_changed {
            self.permissions.clear();
        }
        Ok(affected)
    }

    /// Drop every association edge touching `oid`, queueing the
    /// disassociation on whichever node owns the edge.
    async fn sever(&mut self, oid: Oid, kind: NodeKind, affected: &mut Vec<Oid>) -> Result<()> {
        self.materialize(oid).await?;
        let (associations, references) = match self.tree.get(oid) {
            Some(b) => (b.associations().to_vec(), b.references().to_vec()),
            None => return Err(SiptrackError::NonExistent(oid.to_string())),
        };

        for other in associations {
            self.tree.disassociate(oid, other)?;
            self.node_mut(oid)
                .await?
                .journal_mut()
                .push(StorageAction::Disassociate(other));
            self.emit(EventKind::NodeDisassociate, oid, kind, Some(other));
        }
        for other in references {
            let other_kind = self.kind_of(other)?;
            self.tree.disassociate(other, oid)?;
            let node = self.node_mut(other).await?;
            node.journal_mut().push(StorageAction::Disassociate(oid));
            node.journal_mut().touch();
            self.emit(EventKind::NodeDisassociate, other, other_kind, Some(oid));
            push_unique(affected, other);
        }
        Ok(())
    }

    /// Move a node under `new_parent`.
    ///
    /// Both ends need write access; the new parent must accept the node's
    /// kind, sit in the same view and not be inside the moved subtree.
    pub async fn relocate(
        &mut self,
        oid: Oid,
        new_parent: Oid,
        user: Option<&Principal>,
    ) -> Result<()> {
        let kind = self.kind_of(oid)?;
        let parent_kind = self.kind_of(new_parent)?;
        self.require_access(oid, user, Access::Write).await?;
        self.require_access(new_parent, user, Access::Write).await?;
        if oid == new_parent {
            return Err(SiptrackError::InvalidOperation(
                "a node can't be its own parent".to_string(),
            ));
        }
        if !self.registry.is_valid_child(parent_kind, kind) {
            return Err(SiptrackError::InvalidOperation(
                "incompatible classes for relocation".to_string(),
            ));
        }
        if self.get_parent(oid, NodeKind::View, false)
            != self.get_parent(new_parent, NodeKind::View, true)
        {
            return Err(SiptrackError::InvalidOperation(
                "can't relocate between views".to_string(),
            ));
        }

        self.tree.relocate(oid, Some(new_parent))?;
        let node = self.node_mut(oid).await?;
        node.journal_mut().push(StorageAction::Relocate {
            parent: Some(new_parent),
        });
        node.journal_mut().touch();
        // Inherited permissions of the whole moved subtree changed.
        self.permissions.clear();
        debug!(oid = %oid, parent = %new_parent, "node relocated");
        self.emit(EventKind::NodeRelocate, oid, kind, Some(new_parent));
        Ok(())
    }

    /// Create the association `oid → other`.
    pub async fn associate(
        &mut self,
        oid: Oid,
        other: Oid,
        user: Option<&Principal>,
    ) -> Result<()> {
        let kind = self.kind_of(oid)?;
        self.kind_of(other)?;
        self.require_access(oid, user, Access::Write).await?;
        self.tree.associate(oid, other)?;
        let node = self.node_mut(oid).await?;
        node.journal_mut().push(StorageAction::Associate(other));
        node.journal_mut().touch();
        self.node_mut(other).await?.journal_mut().touch();
        self.emit(EventKind::NodeAssociate, oid, kind, Some(other));
        Ok(())
    }

    /// Remove the association `oid → other`.
    pub async fn disassociate(
        &mut self,
        oid: Oid,
        other: Oid,
        user: Option<&Principal>,
    ) -> Result<()> {
        let kind = self.kind_of(oid)?;
        self.require_access(oid, user, Access::Write).await?;
        self.tree.disassociate(oid, other)?;
        let node = self.node_mut(oid).await?;
        node.journal_mut().push(StorageAction::Disassociate(other));
        node.journal_mut().touch();
        self.node_mut(other).await?.journal_mut().touch();
        self.emit(EventKind::NodeDisassociate, oid, kind, Some(other));
        Ok(())
    }

    /// Remove the edge between `a` and `b` in whichever direction it
    /// exists. Returns the node that owned the edge.
    pub async fn dis_assoc_ref(
        &mut self,
        a: Oid,
        b: Oid,
        user: Option<&Principal>,
    ) -> Result<Oid> {
        if self.tree.is_associated(a, b) {
            self.disassociate(a, b, user).await?;
            Ok(a)
        } else if self.tree.is_associated(b, a) {
            self.disassociate(b, a, user).await?;
            Ok(b)
        } else {
            Err(SiptrackError::InvalidOperation(
                "objects not associated".to_string(),
            ))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::store::StoreOptions;
    use crate::types::Value;

    async fn store() -> ObjectStore {
        ObjectStore::open(Box::new(MemoryStorage::new()), StoreOptions::default())
            .await
            .expect("open")
    }

    async fn device_tree(store: &mut ObjectStore) -> (Oid, Oid) {
        let view = store
            .add(VIEW_TREE_OID, "view", NodeArgs::new(), None)
            .await
            .expect("view");
        let dt = store
            .add(view, "device tree", NodeArgs::new(), None)
            .await
            .expect("device tree");
        (view, dt)
    }

    #[tokio::test]
    async fn invalid_child_consumes_no_oid() {
        let mut store = store().await;
        let (view, _) = device_tree(&mut store).await;
        let next = store.registry().next_oid();
        let children = store.tree().get(view).expect("view").children().len();

        let err = store
            .add(view, "device", NodeArgs::new(), None)
            .await
            .expect_err("device under view");
        assert!(matches!(err, SiptrackError::InvalidOperation(_)));
        assert_eq!(store.registry().next_oid(), next);
        assert_eq!(store.tree().get(view).expect("view").children().len(), children);
    }

    #[tokio::test]
    async fn failed_construction_rolls_back() {
        let mut store = store().await;
        let (_, dt) = device_tree(&mut store).await;
        let next = store.registry().next_oid();

        let err = store
            .add(dt, "attribute", NodeArgs::new().with("name", "x"), None)
            .await
            .expect_err("no atype");
        assert!(matches!(err, SiptrackError::MissingData(_)));
        assert_eq!(store.registry().next_oid(), next);
        assert!(!store.contains(Oid(next)));
    }

    #[tokio::test]
    async fn remove_adopts_children_and_severs_edges() {
        let mut store = store().await;
        let (_, dt) = device_tree(&mut store).await;
        let outer = store.add(dt, "device", NodeArgs::new(), None).await.expect("d");
        let inner = store.add(outer, "device", NodeArgs::new(), None).await.expect("d");
        let other = store.add(dt, "device", NodeArgs::new(), None).await.expect("d");
        store.associate(other, outer, None).await.expect("assoc");
        store.commit_pending().await.expect("commit");

        let affected = store.remove(outer, false, None).await.expect("remove");
        assert!(affected.contains(&outer));
        assert!(affected.contains(&inner));
        assert!(affected.contains(&other));
        assert_eq!(store.tree().parent_of(inner), Some(dt));
        assert!(store.tree().get(other).expect("other").associations().is_empty());

        store.commit(&affected).await.expect("commit");
        let rows = store.storage().list_oids().await.expect("list");
        assert!(rows.contains(&(Some(dt), inner)));
        assert!(store.storage().list_associations().await.expect("assoc").is_empty());
    }

    #[tokio::test]
    async fn relocate_checks_schema_and_subtree() {
        let mut store = store().await;
        let (view, dt) = device_tree(&mut store).await;
        let a = store.add(dt, "device", NodeArgs::new(), None).await.expect("d");
        let b = store.add(a, "device", NodeArgs::new(), None).await.expect("d");

        assert!(store.relocate(a, b, None).await.is_err());
        assert!(store.relocate(a, view, None).await.is_err());
        assert!(store.relocate(a, a, None).await.is_err());

        store.relocate(b, dt, None).await.expect("relocate");
        assert_eq!(store.tree().parent_of(b), Some(dt));
    }

    #[tokio::test]
    async fn relocate_between_views_is_refused() {
        let mut store = store().await;
        let (_, dt1) = device_tree(&mut store).await;
        let (_, dt2) = device_tree(&mut store).await;
        let d = store.add(dt1, "device", NodeArgs::new(), None).await.expect("d");
        let err = store.relocate(d, dt2, None).await.expect_err("views");
        assert_eq!(
            err,
            SiptrackError::InvalidOperation("can't relocate between views".into())
        );
    }

    #[tokio::test]
    async fn dis_assoc_ref_handles_either_direction() {
        let mut store = store().await;
        let (_, dt) = device_tree(&mut store).await;
        let a = store.add(dt, "device", NodeArgs::new(), None).await.expect("d");
        let b = store.add(dt, "device", NodeArgs::new(), None).await.expect("d");
        store.associate(a, b, None).await.expect("assoc");

        assert_eq!(store.dis_assoc_ref(b, a, None).await.expect("dis"), a);
        assert!(store.dis_assoc_ref(a, b, None).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_usernames_are_refused() {
        let mut store = store().await;
        let manager = store
            .get_field(VIEW_TREE_OID, "user_manager")
            .await
            .expect("um")
            .as_ref_oid()
            .expect("manager");
        let err = store
            .add(
                manager,
                "user local",
                NodeArgs::new().with("username", "admin"),
                None,
            )
            .await
            .expect_err("duplicate");
        assert!(matches!(err, SiptrackError::AlreadyExists(_)));

        store
            .add(manager, "user local", NodeArgs::new().with("username", "bob"), None)
            .await
            .expect("bob");
        assert_eq!(
            store.get_field(VIEW_TREE_OID, "user_manager").await.expect("um"),
            Value::Ref(manager)
        );
    }
}
