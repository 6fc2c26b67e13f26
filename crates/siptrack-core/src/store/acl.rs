//! Permission checks backed by the permission cache.

use super::ObjectStore;
use crate::permission::{Access, PermissionRule, Principal, evaluate};
use crate::registry::NodeKind;
use crate::types::{Oid, Result, SiptrackError, Value};

fn ref_list(value: &Value) -> Vec<Oid> {
    match value {
        Value::List(items) => items.iter().filter_map(Value::as_ref_oid).collect(),
        other => other.as_ref_oid().into_iter().collect(),
    }
}

impl ObjectStore {
    pub async fn has_read_permission(
        &mut self,
        oid: Oid,
        user: Option<&Principal>,
    ) -> Result<bool> {
        self.has_permission(oid, user, Access::Read).await
    }

    pub async fn has_write_permission(
        &mut self,
        oid: Oid,
        user: Option<&Principal>,
    ) -> Result<bool> {
        self.has_permission(oid, user, Access::Write).await
    }

    pub(crate) async fn require_access(
        &mut self,
        oid: Oid,
        user: Option<&Principal>,
        access: Access,
    ) -> Result<()> {
        if self.has_permission(oid, user, access).await? {
            Ok(())
        } else {
            Err(SiptrackError::PermissionDenied)
        }
    }

    async fn has_permission(
        &mut self,
        oid: Oid,
        user: Option<&Principal>,
        access: Access,
    ) -> Result<bool> {
        let kind = self.kind_of(oid)?;
        let Some(principal) = user else {
            return Ok(true);
        };
        if principal.administrator {
            return Ok(true);
        }

        let mut rules = Vec::new();
        if !kind.requires_admin() && oid != principal.user {
            self.warm_permissions(oid).await?;
            for perm in self.permissions.get(oid).to_vec() {
                rules.push(self.permission_rule(perm).await?);
            }
        }
        Ok(evaluate(
            user,
            oid,
            kind,
            &rules,
            access,
            self.options.permissive_acl,
        ))
    }

    /// The first cached permission of `oid` that matches `user`.
    pub async fn get_permission(
        &mut self,
        oid: Oid,
        user: &Principal,
    ) -> Result<Option<Oid>> {
        self.kind_of(oid)?;
        self.warm_permissions(oid).await?;
        for perm in self.permissions.get(oid).to_vec() {
            if self.permission_rule(perm).await?.matches_user(user.user) {
                return Ok(Some(perm));
            }
        }
        Ok(None)
    }

    /// Fill the cache for `oid` and every ancestor, top-down.
    ///
    /// A node's list is its parent's recursive permissions followed by its
    /// own permission children.
    async fn warm_permissions(&mut self, oid: Oid) -> Result<()> {
        if self.permissions.is_warm(oid) {
            return Ok(());
        }
        let mut chain = self.tree.ancestors(oid);
        chain.reverse();
        chain.push(oid);

        let mut inherited: Vec<Oid> = Vec::new();
        for node in chain {
            if self.permissions.is_warm(node) {
                inherited = self.permissions.get(node).to_vec();
                continue;
            }
            let mut entries = Vec::new();
            for perm in inherited {
                if self.get_field(perm, "recursive").await?.as_bool() == Some(true) {
                    entries.push(perm);
                }
            }
            let own: Vec<Oid> = self
                .tree
                .get(node)
                .map(|b| b.children().to_vec())
                .unwrap_or_default()
                .into_iter()
                .filter(|c| self.classes.get(c) == Some(&NodeKind::Permission))
                .collect();
            entries.extend(own);
            self.permissions.insert(node, entries.clone());
            inherited = entries;
        }
        Ok(())
    }

    async fn permission_rule(&mut self, perm: Oid) -> Result<PermissionRule> {
        let flag = |v: Value| v.as_bool().unwrap_or(false);
        let read_access = flag(self.get_field(perm, "read_access").await?);
        let write_access = flag(self.get_field(perm, "write_access").await?);
        let all_users = flag(self.get_field(perm, "all_users").await?);
        let users = ref_list(&self.get_field(perm, "users").await?);

        let mut group_users = Vec::new();
        for group in ref_list(&self.get_field(perm, "groups").await?) {
            group_users.extend(ref_list(&self.get_field(group, "users").await?));
        }
        Ok(PermissionRule {
            oid: perm,
            read_access,
            write_access,
            all_users,
            users,
            group_users,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use crate::node::NodeArgs;
    use crate::permission::Principal;
    use crate::primitives::VIEW_TREE_OID;
    use crate::storage::MemoryStorage;
    use crate::store::{ObjectStore, StoreOptions};
    use crate::types::{Oid, Value};

    struct Fixture {
        store: ObjectStore,
        user: Principal,
        view: Oid,
        device: Oid,
    }

    async fn fixture() -> Fixture {
        let mut store =
            ObjectStore::open(Box::new(MemoryStorage::new()), StoreOptions::default())
                .await
                .expect("open");
        let manager = store
            .get_field(VIEW_TREE_OID, "user_manager")
            .await
            .expect("um")
            .as_ref_oid()
            .expect("manager");
        let bob = store
            .add(manager, "user local", NodeArgs::new().with("username", "bob"), None)
            .await
            .expect("bob");
        let view = store
            .add(VIEW_TREE_OID, "view", NodeArgs::new(), None)
            .await
            .expect("view");
        let dt = store
            .add(view, "device tree", NodeArgs::new(), None)
            .await
            .expect("dt");
        let device = store
            .add(dt, "device", NodeArgs::new(), None)
            .await
            .expect("device");
        Fixture {
            user: store.principal_for(bob).await.expect("principal"),
            store,
            view,
            device,
        }
    }

    fn permission(read: bool, write: bool, recursive: bool) -> NodeArgs {
        NodeArgs::new()
            .with("read_access", read)
            .with("write_access", write)
            .with("all_users", true)
            .with("recursive", recursive)
    }

    #[tokio::test]
    async fn no_rule_denies_by_default() {
        let mut f = fixture().await;
        assert!(!f.store.has_read_permission(f.device, Some(&f.user)).await.expect("check"));
        assert!(f.store.has_read_permission(f.device, None).await.expect("check"));
    }

    #[tokio::test]
    async fn recursive_permission_reaches_descendants_until_removed() {
        let mut f = fixture().await;
        let perm = f
            .store
            .add(f.view, "permission", permission(true, false, true), None)
            .await
            .expect("perm");

        assert!(f.store.has_read_permission(f.device, Some(&f.user)).await.expect("read"));
        assert!(!f.store.has_write_permission(f.device, Some(&f.user)).await.expect("write"));
        assert_eq!(
            f.store.get_permission(f.device, &f.user).await.expect("get"),
            Some(perm)
        );

        f.store.remove(perm, false, None).await.expect("remove");
        assert!(f.store.permission_cache().is_empty());
        assert!(!f.store.has_read_permission(f.device, Some(&f.user)).await.expect("read"));
    }

    #[tokio::test]
    async fn non_recursive_permission_stays_on_its_node() {
        let mut f = fixture().await;
        f.store
            .add(f.view, "permission", permission(true, true, false), None)
            .await
            .expect("perm");
        assert!(f.store.has_write_permission(f.view, Some(&f.user)).await.expect("view"));
        assert!(!f.store.has_write_permission(f.device, Some(&f.user)).await.expect("device"));
    }

    #[tokio::test]
    async fn group_membership_grants_access() {
        let mut f = fixture().await;
        let manager = f
            .store
            .get_field(VIEW_TREE_OID, "user_manager")
            .await
            .expect("um")
            .as_ref_oid()
            .expect("manager");
        let group = f
            .store
            .add(
                manager,
                "user group",
                NodeArgs::new().with("users", Value::List(vec![Value::Ref(f.user.user)])),
                None,
            )
            .await
            .expect("group");
        f.store
            .add(
                f.view,
                "permission",
                NodeArgs::new()
                    .with("read_access", true)
                    .with("recursive", true)
                    .with("groups", Value::List(vec![Value::Ref(group)])),
                None,
            )
            .await
            .expect("perm");
        assert!(f.store.has_read_permission(f.device, Some(&f.user)).await.expect("read"));
    }

    #[tokio::test]
    async fn users_cannot_create_permissions() {
        let mut f = fixture().await;
        let err = f
            .store
            .add(f.view, "permission", permission(true, true, true), Some(&f.user))
            .await
            .expect_err("admin only");
        assert_eq!(err, crate::types::SiptrackError::PermissionDenied);
    }

    #[tokio::test]
    async fn permissive_policy_allows_with_warning() {
        let mut store = ObjectStore::open(
            Box::new(MemoryStorage::new()),
            StoreOptions {
                permissive_acl: true,
                ..StoreOptions::default()
            },
        )
        .await
        .expect("open");
        let view = store
            .add(VIEW_TREE_OID, "view", NodeArgs::new(), None)
            .await
            .expect("view");
        let user = Principal::new(Oid(9999), false);
        assert!(store.has_write_permission(view, Some(&user)).await.expect("check"));
    }
}
