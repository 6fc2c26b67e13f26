//! Draining node journals into the backend.

use super::ObjectStore;
use crate::formats::encode_value;
use crate::journal::StorageAction;
use crate::storage::Storage;
use crate::types::{Oid, Result};
use tracing::{debug, warn};

impl ObjectStore {
    /// Persist the queued actions of `oids`, in batch order.
    ///
    /// Not atomic across nodes: on a backend failure the nodes before the
    /// failing one stay persisted, and the failing node keeps its
    /// unapplied actions (the failed one first) so a retry resumes there.
    pub async fn commit(&mut self, oids: &[Oid]) -> Result<()> {
        for oid in oids {
            self.commit_node(*oid).await?;
        }
        Ok(())
    }

    /// Commit every node with queued actions.
    pub async fn commit_pending(&mut self) -> Result<usize> {
        let pending = self.pending();
        self.commit(&pending).await?;
        Ok(pending.len())
    }

    /// Oids of nodes with queued actions, live nodes first.
    pub fn pending(&self) -> Vec<Oid> {
        let live = self
            .tree
            .oids()
            .filter(|oid| self.tree.ext(*oid).is_some_and(|n| !n.pending_actions().is_empty()));
        let removed = self
            .graveyard
            .iter()
            .filter(|(_, n)| !n.pending_actions().is_empty())
            .map(|(oid, _)| *oid);
        live.chain(removed).collect()
    }

    async fn commit_node(&mut self, oid: Oid) -> Result<()> {
        let Some(node) = self.journal_owner(oid) else {
            // Never materialized, so nothing can be queued.
            return Ok(());
        };
        let class_id = node.class_id();
        let actions = node.journal_mut().take();
        if actions.is_empty() {
            return Ok(());
        }

        debug!(oid = %oid, actions = actions.len(), "committing node");
        let mut removed = false;
        for (i, action) in actions.iter().enumerate() {
            if let Err(e) = apply(self.storage.as_ref(), oid, class_id, action).await {
                warn!(
                    oid = %oid,
                    action = action.name(),
                    error = %e,
                    "commit failed, keeping unapplied actions"
                );
                if let Some(node) = self.journal_owner(oid) {
                    node.journal_mut().restore(actions[i..].to_vec());
                }
                return Err(e);
            }
            removed |= matches!(action, StorageAction::RemoveNode);
        }
        if removed {
            self.graveyard.remove(&oid);
        }
        Ok(())
    }
}

async fn apply(
    storage: &dyn Storage,
    oid: Oid,
    class_id: &str,
    action: &StorageAction,
) -> Result<()> {
    match action {
        StorageAction::CreateNode { parent } => storage.add_oid(*parent, oid, class_id).await,
        StorageAction::RemoveNode => storage.remove_oid(oid).await,
        StorageAction::Relocate { parent } => storage.relocate(oid, *parent).await,
        StorageAction::Associate(other) => storage.associate(oid, *other).await,
        StorageAction::Disassociate(other) => storage.disassociate(oid, *other).await,
        StorageAction::WriteData { name, value } => {
            let bytes = encode_value(value)?;
            storage.write_data(oid, name, &bytes).await
        }
    }
}
