//! Opening, bootstrapping and reloading a store.

use super::{ObjectStore, StoreOptions};
use crate::field::DataMap;
use crate::formats::decode_value;
use crate::node::NodeArgs;
use crate::primitives::{
    DEFAULT_ADMIN_USERNAME, DEFAULT_USER_MANAGER_NAME, STORE_VERSION, VIEW_TREE_OID,
};
use crate::registry::NodeKind;
use crate::storage::Storage;
use crate::tree::FilterResult;
use crate::types::{Oid, Result, SiptrackError, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};

impl ObjectStore {
    /// Open a store on `storage`, loading everything it holds.
    ///
    /// An empty backend is initialized and bootstrapped with the view tree,
    /// a default user manager and an administrator.
    pub async fn open(storage: Box<dyn Storage>, options: StoreOptions) -> Result<Self> {
        storage.initialize(STORE_VERSION).await?;
        let found = storage.version().await?;
        if found.as_deref() != Some(STORE_VERSION) {
            return Err(SiptrackError::InvalidStorageVersion {
                wanted: STORE_VERSION.to_string(),
                found: found.unwrap_or_else(|| "none".to_string()),
            });
        }

        let mut store = Self::empty(storage, options);
        store.load().await?;
        Ok(store)
    }

    /// Drop the in-memory snapshot and load it again from the backend.
    ///
    /// Uncommitted changes are lost.
    pub async fn reload(&mut self) -> Result<()> {
        let freed = self.tree.free();
        self.classes.clear();
        self.permissions.clear();
        self.graveyard.clear();
        info!(freed, "reloading object store");
        self.load().await
    }

    async fn load(&mut self) -> Result<()> {
        self.populate().await?;
        if !self.tree.contains(VIEW_TREE_OID) {
            self.bootstrap().await?;
        }
        if self.options.preload {
            self.preload().await?;
        }
        self.init_user_manager().await?;
        info!(
            nodes = self.tree.len(),
            next_oid = self.registry.next_oid(),
            "object store loaded"
        );
        Ok(())
    }

    /// Phase one: bare branches and association edges, no nodes.
    async fn populate(&mut self) -> Result<()> {
        for (oid, class_id) in self.storage.list_oid_classes().await? {
            match NodeKind::from_class_id(&class_id) {
                Some(kind) if self.registry.is_registered(kind) => {
                    self.classes.insert(oid, kind);
                }
                _ => warn!(oid = %oid, class_id = %class_id, "skipping node of unknown class"),
            }
        }

        let placements = self.storage.list_oids().await?;
        let highest = placements.iter().map(|(_, oid)| oid.0).max();
        let known: Vec<_> = placements
            .into_iter()
            .filter(|(_, oid)| self.classes.contains_key(oid))
            .collect();
        for orphan in self.tree.load_branches(known)? {
            self.classes.remove(&orphan);
        }
        self.classes.retain(|oid, _| self.tree.contains(*oid));

        let associations: Vec<(Oid, Oid)> = self
            .storage
            .list_associations()
            .await?
            .into_iter()
            .filter(|(a, b)| self.tree.contains(*a) && self.tree.contains(*b))
            .collect();
        let skipped = self.tree.load_associations(associations);
        if skipped > 0 {
            warn!(skipped, "associations skipped during load");
        }

        if let Some(highest) = highest {
            let next = highest.saturating_add(1).max(self.registry.next_oid());
            self.registry.set_next_oid(next);
        }
        Ok(())
    }

    /// Phase two: materialize every node, then hydrate each from one bulk
    /// data read.
    async fn preload(&mut self) -> Result<()> {
        let mut data: BTreeMap<Oid, DataMap> = BTreeMap::new();
        for (oid, name, bytes) in self.storage.iter_oid_data().await? {
            match decode_value(&bytes) {
                Ok(value) => {
                    data.entry(oid).or_default().insert(name, value);
                }
                Err(e) => warn!(oid = %oid, field = %name, error = %e, "skipping undecodable value"),
            }
        }

        let fresh: Vec<Oid> = self
            .tree
            .traverse(None, false, None, |b| {
                if b.has_ext() {
                    FilterResult::NoMatch
                } else {
                    FilterResult::Match
                }
            })
            .map(|(_, oid)| oid)
            .collect();

        self.loading = true;
        let result = self.hydrate(&fresh, &data).await;
        self.loading = false;
        result
    }

    async fn hydrate(&mut self, oids: &[Oid], data: &BTreeMap<Oid, DataMap>) -> Result<()> {
        for oid in oids {
            self.materialize(*oid).await?;
        }
        for oid in oids {
            if let Some(node) = self.tree.ext_mut(*oid) {
                node.loaded(data.get(oid))?;
            }
        }
        Ok(())
    }

    /// Create and commit the view tree of an empty store at oid 0.
    async fn bootstrap(&mut self) -> Result<()> {
        info!("bootstrapping empty object store");
        let next = self.registry.next_oid();
        self.registry.set_next_oid(VIEW_TREE_OID.0);
        let created =
            self.registry
                .create_object(&mut self.tree, NodeKind::ViewTree, None, NodeArgs::new());
        self.registry
            .set_next_oid(next.max(VIEW_TREE_OID.0.saturating_add(1)));
        let oid = created?;
        self.classes.insert(oid, NodeKind::ViewTree);
        match self.tree.ext_mut(oid) {
            Some(node) => node.created(None)?,
            None => return Err(SiptrackError::NonExistent(oid.to_string())),
        }
        self.commit(&[oid]).await
    }

    /// Make sure the view tree points at a user manager with an
    /// administrator in it.
    async fn init_user_manager(&mut self) -> Result<()> {
        let current = self.get_field(VIEW_TREE_OID, "user_manager").await?;
        if current.as_ref_oid().is_some() {
            return Ok(());
        }
        if self.storage.is_readonly() {
            warn!("no user manager and storage is readonly, skipping creation");
            return Ok(());
        }

        info!("creating default user manager");
        let manager = self
            .add(VIEW_TREE_OID, "user manager local", NodeArgs::new(), None)
            .await?;
        let name = self
            .add(
                manager,
                "attribute",
                NodeArgs::new()
                    .with("name", "name")
                    .with("atype", "text")
                    .with("value", DEFAULT_USER_MANAGER_NAME),
                None,
            )
            .await?;
        let admin = self
            .add(
                manager,
                "user local",
                NodeArgs::new()
                    .with("username", DEFAULT_ADMIN_USERNAME)
                    .with("administrator", true),
                None,
            )
            .await?;
        self.set_field(VIEW_TREE_OID, "user_manager", Value::Ref(manager), None)
            .await?;
        self.commit(&[manager, name, admin, VIEW_TREE_OID]).await
    }
}
