//! # Storage Actions
//!
//! Every mutation of a node is recorded as a [`StorageAction`] in the
//! node's [`Journal`]. Nothing reaches the backend until the store commits
//! the node; commit drains the journal in enqueue order.

use crate::types::{Oid, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// A queued, not-yet-persisted mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageAction {
    CreateNode { parent: Option<Oid> },
    RemoveNode,
    Relocate { parent: Option<Oid> },
    Associate(Oid),
    Disassociate(Oid),
    WriteData { name: String, value: Value },
}

impl StorageAction {
    pub fn name(&self) -> &'static str {
        match self {
            StorageAction::CreateNode { .. } => "create_node",
            StorageAction::RemoveNode => "remove_node",
            StorageAction::Relocate { .. } => "relocate",
            StorageAction::Associate(_) => "associate",
            StorageAction::Disassociate(_) => "disassociate",
            StorageAction::WriteData { .. } => "write_data",
        }
    }
}

/// Seconds since the unix epoch.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Pending actions plus the in-memory modification time of one node.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    actions: Vec<StorageAction>,
    modtime: i64,
}

impl Journal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: StorageAction) {
        self.actions.push(action);
    }

    /// Queue a field write and bump the modification time.
    pub fn write(&mut self, name: &str, value: Value) {
        self.actions.push(StorageAction::WriteData {
            name: name.to_string(),
            value,
        });
        self.touch();
    }

    pub fn touch(&mut self) {
        self.modtime = now_secs();
    }

    pub fn modtime(&self) -> i64 {
        self.modtime
    }

    pub fn actions(&self) -> &[StorageAction] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Swap the queue out, leaving it empty.
    pub fn take(&mut self) -> Vec<StorageAction> {
        std::mem::take(&mut self.actions)
    }

    /// Put unapplied actions back ahead of anything queued since `take`.
    pub fn restore(&mut self, mut unapplied: Vec<StorageAction>) {
        unapplied.append(&mut self.actions);
        self.actions = unapplied;
    }
}
