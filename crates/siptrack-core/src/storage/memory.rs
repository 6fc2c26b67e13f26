//! # In-Memory Storage
//!
//! Process-local tables behind a mutex. Writes from concurrent callers are
//! serialized by the lock; the lock is never held across an await point.

use super::{OidData, OidPlacement, Storage, readonly_error};
use crate::types::{Oid, Result, SiptrackError};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tables {
    version: Option<String>,
    idmap: BTreeMap<Oid, (Option<Oid>, String)>,
    associations: BTreeSet<(Oid, Oid)>,
    nodedata: BTreeMap<(Oid, String), Vec<u8>>,
}

/// A storage backend that lives and dies with the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
    readonly: bool,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every mutating call from now on.
    #[must_use]
    pub fn into_readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| SiptrackError::Storage("memory storage lock poisoned".to_string()))
    }

    fn write(&self) -> Result<MutexGuard<'_, Tables>> {
        if self.readonly {
            return Err(readonly_error());
        }
        self.lock()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn initialize(&self, version: &str) -> Result<()> {
        if self.lock()?.version.is_some() {
            return Ok(());
        }
        self.write()?.version = Some(version.to_string());
        Ok(())
    }

    async fn version(&self) -> Result<Option<String>> {
        Ok(self.lock()?.version.clone())
    }

    async fn add_oid(&self, parent: Option<Oid>, oid: Oid, class_id: &str) -> Result<()> {
        self.write()?
            .idmap
            .insert(oid, (parent, class_id.to_string()));
        Ok(())
    }

    async fn remove_oid(&self, oid: Oid) -> Result<()> {
        let mut tables = self.write()?;
        tables.idmap.remove(&oid);
        tables.nodedata.retain(|(o, _), _| *o != oid);
        tables.associations.retain(|(a, b)| *a != oid && *b != oid);
        Ok(())
    }

    async fn relocate(&self, oid: Oid, new_parent: Option<Oid>) -> Result<()> {
        let mut tables = self.write()?;
        let row = tables
            .idmap
            .get_mut(&oid)
            .ok_or_else(|| SiptrackError::Storage(format!("relocate of unknown oid {oid}")))?;
        row.0 = new_parent;
        Ok(())
    }

    async fn associate(&self, oid: Oid, other: Oid) -> Result<()> {
        self.write()?.associations.insert((oid, other));
        Ok(())
    }

    async fn disassociate(&self, oid: Oid, other: Oid) -> Result<()> {
        self.write()?.associations.remove(&(oid, other));
        Ok(())
    }

    async fn write_data(&self, oid: Oid, name: &str, value: &[u8]) -> Result<()> {
        self.write()?
            .nodedata
            .insert((oid, name.to_string()), value.to_vec());
        Ok(())
    }

    async fn read_data(&self, oid: Oid, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.nodedata.get(&(oid, name.to_string())).cloned())
    }

    async fn list_oids(&self) -> Result<Vec<OidPlacement>> {
        Ok(self
            .lock()?
            .idmap
            .iter()
            .map(|(oid, (parent, _))| (*parent, *oid))
            .collect())
    }

    async fn list_oid_classes(&self) -> Result<Vec<(Oid, String)>> {
        Ok(self
            .lock()?
            .idmap
            .iter()
            .map(|(oid, (_, class_id))| (*oid, class_id.clone()))
            .collect())
    }

    async fn list_associations(&self) -> Result<Vec<(Oid, Oid)>> {
        Ok(self.lock()?.associations.iter().copied().collect())
    }

    async fn iter_oid_data(&self) -> Result<Vec<OidData>> {
        Ok(self
            .lock()?
            .nodedata
            .iter()
            .map(|((oid, name), value)| (*oid, name.clone(), value.clone()))
            .collect())
    }

    fn is_readonly(&self) -> bool {
        self.readonly
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remove_oid_drops_data_and_edges() {
        let storage = MemoryStorage::new();
        storage.add_oid(None, Oid(0), "VT").await.expect("add");
        storage.add_oid(Some(Oid(0)), Oid(1), "V").await.expect("add");
        storage.add_oid(Some(Oid(0)), Oid(2), "V").await.expect("add");
        storage.write_data(Oid(1), "ctime", b"x").await.expect("write");
        storage.associate(Oid(1), Oid(2)).await.expect("assoc");
        storage.associate(Oid(2), Oid(1)).await.expect("assoc");

        storage.remove_oid(Oid(1)).await.expect("remove");

        assert_eq!(
            storage.list_oids().await.expect("list"),
            vec![(None, Oid(0)), (Some(Oid(0)), Oid(2))]
        );
        assert!(storage.list_associations().await.expect("assoc").is_empty());
        assert_eq!(storage.read_data(Oid(1), "ctime").await.expect("read"), None);
    }

    #[tokio::test]
    async fn readonly_refuses_writes_but_reads() {
        let storage = MemoryStorage::new().into_readonly();
        let err = storage
            .add_oid(None, Oid(0), "VT")
            .await
            .expect_err("readonly");
        assert_eq!(err, readonly_error());
        assert!(storage.initialize("1").await.is_err());
        assert!(storage.list_oids().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn initialize_keeps_existing_version() {
        let storage = MemoryStorage::new();
        storage.initialize("1").await.expect("init");
        storage.initialize("2").await.expect("init again");
        assert_eq!(storage.version().await.expect("version"), Some("1".into()));
    }
}
