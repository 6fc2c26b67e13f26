//! # redb-backed Storage
//!
//! A disk-backed implementation of the storage contract using the redb
//! embedded database.
//!
//! ## Tables
//!
//! - `idmap`: oid → postcard `(parent, class_id)`
//! - `associations`: `(oid, other)` → `()`
//! - `nodedata`: `(oid, field name)` → encoded value bytes
//! - `metadata`: key → text (schema version marker)
//!
//! Every mutating call is its own write transaction; nothing is atomic
//! across calls.

use super::{OidData, OidPlacement, Storage, readonly_error};
use crate::types::{Oid, Result, SiptrackError};
use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Table for placements: oid(u64) -> serialized IdRow bytes
const IDMAP: TableDefinition<u64, &[u8]> = TableDefinition::new("idmap");

/// Table for associations: (oid, other_oid) -> ()
const ASSOCIATIONS: TableDefinition<(u64, u64), ()> = TableDefinition::new("associations");

/// Table for field data: (oid, field name) -> encoded value
const NODEDATA: TableDefinition<(u64, &str), &[u8]> = TableDefinition::new("nodedata");

/// Table for metadata: key string -> value string
const METADATA: TableDefinition<&str, &str> = TableDefinition::new("metadata");

const VERSION_KEY: &str = "version";

#[derive(Debug, Serialize, Deserialize)]
struct IdRow {
    parent: Option<u64>,
    class_id: String,
}

fn storage_err(e: impl std::fmt::Display) -> SiptrackError {
    SiptrackError::Storage(e.to_string())
}

/// A storage backend persisted in a single redb file.
pub struct RedbStorage {
    db: Database,
    readonly: bool,
}

impl std::fmt::Debug for RedbStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStorage")
            .field("readonly", &self.readonly)
            .finish_non_exhaustive()
    }
}

impl RedbStorage {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path.as_ref()).map_err(storage_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(storage_err)?;
            let _ = write_txn.open_table(IDMAP).map_err(storage_err)?;
            let _ = write_txn.open_table(ASSOCIATIONS).map_err(storage_err)?;
            let _ = write_txn.open_table(NODEDATA).map_err(storage_err)?;
            let _ = write_txn.open_table(METADATA).map_err(storage_err)?;
            write_txn.commit().map_err(storage_err)?;
        }

        Ok(Self {
            db,
            readonly: false,
        })
    }

    /// Open an existing database that refuses every mutating call.
    pub fn open_readonly(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::open(path.as_ref()).map_err(storage_err)?;
        Ok(Self { db, readonly: true })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<()> {
        if self.readonly {
            return Err(readonly_error());
        }
        self.db.compact().map_err(storage_err)?;
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            Err(readonly_error())
        } else {
            Ok(())
        }
    }

    fn put_row(&self, oid: Oid, row: &IdRow) -> Result<()> {
        let bytes = postcard::to_allocvec(row)
            .map_err(|e| SiptrackError::Serialization(e.to_string()))?;
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(IDMAP).map_err(storage_err)?;
            table
                .insert(oid.0, bytes.as_slice())
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn get_row(&self, oid: Oid) -> Result<Option<IdRow>> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(IDMAP).map_err(storage_err)?;
        let Some(guard) = table.get(oid.0).map_err(storage_err)? else {
            return Ok(None);
        };
        let row = postcard::from_bytes(guard.value())
            .map_err(|e| SiptrackError::Serialization(e.to_string()))?;
        Ok(Some(row))
    }

    fn rows(&self) -> Result<Vec<(Oid, IdRow)>> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(IDMAP).map_err(storage_err)?;
        let mut rows = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (key, value) = entry.map_err(storage_err)?;
            let row: IdRow = postcard::from_bytes(value.value())
                .map_err(|e| SiptrackError::Serialization(e.to_string()))?;
            rows.push((Oid(key.value()), row));
        }
        Ok(rows)
    }
}

#[async_trait]
impl Storage for RedbStorage {
    async fn initialize(&self, version: &str) -> Result<()> {
        if self.version().await?.is_some() {
            return Ok(());
        }
        self.check_writable()?;
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(METADATA).map_err(storage_err)?;
            table.insert(VERSION_KEY, version).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }

    async fn version(&self) -> Result<Option<String>> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(METADATA).map_err(storage_err)?;
        Ok(table
            .get(VERSION_KEY)
            .map_err(storage_err)?
            .map(|v| v.value().to_string()))
    }

    async fn add_oid(&self, parent: Option<Oid>, oid: Oid, class_id: &str) -> Result<()> {
        self.check_writable()?;
        self.put_row(
            oid,
            &IdRow {
                parent: parent.map(|p| p.0),
                class_id: class_id.to_string(),
            },
        )
    }

    async fn remove_oid(&self, oid: Oid) -> Result<()> {
        self.check_writable()?;
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut idmap = write_txn.open_table(IDMAP).map_err(storage_err)?;
            idmap.remove(oid.0).map_err(storage_err)?;

            let mut nodedata = write_txn.open_table(NODEDATA).map_err(storage_err)?;
            let names = {
                let mut names = Vec::new();
                for entry in nodedata.range((oid.0, "")..).map_err(storage_err)? {
                    let (key, _) = entry.map_err(storage_err)?;
                    let (owner, name) = key.value();
                    if owner != oid.0 {
                        break;
                    }
                    names.push(name.to_string());
                }
                names
            };
            for name in &names {
                nodedata
                    .remove((oid.0, name.as_str()))
                    .map_err(storage_err)?;
            }

            let mut associations = write_txn.open_table(ASSOCIATIONS).map_err(storage_err)?;
            let edges = {
                let mut edges = Vec::new();
                for entry in associations.iter().map_err(storage_err)? {
                    let (key, _) = entry.map_err(storage_err)?;
                    let (a, b) = key.value();
                    if a == oid.0 || b == oid.0 {
                        edges.push((a, b));
                    }
                }
                edges
            };
            for edge in edges {
                associations.remove(edge).map_err(storage_err)?;
            }
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }

    async fn relocate(&self, oid: Oid, new_parent: Option<Oid>) -> Result<()> {
        self.check_writable()?;
        let mut row = self
            .get_row(oid)?
            .ok_or_else(|| SiptrackError::Storage(format!("relocate of unknown oid {oid}")))?;
        row.parent = new_parent.map(|p| p.0);
        self.put_row(oid, &row)
    }

    async fn associate(&self, oid: Oid, other: Oid) -> Result<()> {
        self.check_writable()?;
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(ASSOCIATIONS).map_err(storage_err)?;
            table.insert((oid.0, other.0), ()).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }

    async fn disassociate(&self, oid: Oid, other: Oid) -> Result<()> {
        self.check_writable()?;
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(ASSOCIATIONS).map_err(storage_err)?;
            table.remove((oid.0, other.0)).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }

    async fn write_data(&self, oid: Oid, name: &str, value: &[u8]) -> Result<()> {
        self.check_writable()?;
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(NODEDATA).map_err(storage_err)?;
            table.insert((oid.0, name), value).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }

    async fn read_data(&self, oid: Oid, name: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(NODEDATA).map_err(storage_err)?;
        Ok(table
            .get((oid.0, name))
            .map_err(storage_err)?
            .map(|v| v.value().to_vec()))
    }

    async fn list_oids(&self) -> Result<Vec<OidPlacement>> {
        Ok(self
            .rows()?
            .into_iter()
            .map(|(oid, row)| (row.parent.map(Oid), oid))
            .collect())
    }

    async fn list_oid_classes(&self) -> Result<Vec<(Oid, String)>> {
        Ok(self
            .rows()?
            .into_iter()
            .map(|(oid, row)| (oid, row.class_id))
            .collect())
    }

    async fn list_associations(&self) -> Result<Vec<(Oid, Oid)>> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(ASSOCIATIONS).map_err(storage_err)?;
        let mut edges = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (key, _) = entry.map_err(storage_err)?;
            let (a, b) = key.value();
            edges.push((Oid(a), Oid(b)));
        }
        Ok(edges)
    }

    async fn iter_oid_data(&self) -> Result<Vec<OidData>> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(NODEDATA).map_err(storage_err)?;
        let mut data = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (key, value) = entry.map_err(storage_err)?;
            let (oid, name) = key.value();
            data.push((Oid(oid), name.to_string(), value.value().to_vec()));
        }
        Ok(data)
    }

    fn is_readonly(&self) -> bool {
        self.readonly
    }
}

// =============================================================================
// TESTS
// =============================================================================
