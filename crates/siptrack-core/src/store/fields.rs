//! Field access through the store, plus the attribute and counter helpers.

use super::ObjectStore;
use crate::event::EventKind;
use crate::field::FieldContext;
use crate::node::check_attribute_value;
use crate::permission::{Access, Principal};
use crate::primitives::DEFAULT_MAX_VERSIONS;
use crate::registry::NodeKind;
use crate::types::{Oid, Result, SiptrackError, Value};

fn unknown_field(kind: NodeKind, name: &str) -> SiptrackError {
    SiptrackError::InvalidData(format!("{kind} has no field '{name}'"))
}

impl ObjectStore {
    /// Read a field, loading it from the backend on a cache miss.
    ///
    /// Dangling references found on the way are dropped and the healed
    /// value is queued for writing.
    pub async fn get_field(&mut self, oid: Oid, name: &str) -> Result<Value> {
        let kind = self.kind_of(oid)?;
        self.materialize(oid).await?;
        let Some(mut node) = self.tree.take_ext(oid) else {
            return Err(SiptrackError::NonExistent(oid.to_string()));
        };

        let result = {
            let tree = &self.tree;
            let is_live = |other: Oid| tree.contains(other);
            let ctx = FieldContext {
                oid,
                storage: self.storage.as_ref(),
                is_live: &is_live,
            };
            match node.field_and_journal(name) {
                Some((field, journal)) => field.get_value(&ctx, journal).await,
                None => Err(unknown_field(kind, name)),
            }
        };

        self.tree.set_ext(oid, node)?;
        result
    }

    /// [`ObjectStore::get_field`] behind a read permission check.
    pub async fn read_field(
        &mut self,
        oid: Oid,
        name: &str,
        user: Option<&Principal>,
    ) -> Result<Value> {
        self.require_access(oid, user, Access::Read).await?;
        self.get_field(oid, name).await
    }

    /// Validate and set a field, queueing the write.
    pub async fn set_field(
        &mut self,
        oid: Oid,
        name: &str,
        value: Value,
        user: Option<&Principal>,
    ) -> Result<()> {
        let kind = self.kind_of(oid)?;
        self.require_access(oid, user, Access::Write).await?;
        if name == "ctime" {
            return Err(SiptrackError::InvalidOperation(
                "ctime can't be changed".to_string(),
            ));
        }
        if kind.is_attribute() && name == "atype" {
            return Err(SiptrackError::InvalidOperation(
                "attribute type can't be changed".to_string(),
            ));
        }
        if kind == NodeKind::Attribute && name == "value" {
            let atype = self.get_field(oid, "atype").await?;
            if let Some(atype) = atype.as_text() {
                check_attribute_value(atype, &value)?;
            }
        }
        if kind == NodeKind::VersionedAttribute && name == "values" {
            let atype = self.get_field(oid, "atype").await?;
            if let (Some(atype), Value::List(items)) = (atype.as_text(), &value) {
                for item in items {
                    check_attribute_value(atype, item)?;
                }
            }
        }
        let parent = self.tree.parent_of(oid);
        self.validate_field(parent, Some(oid), kind, name, &value)
            .await?;

        let node = self.node_mut(oid).await?;
        let (field, journal) = node
            .field_and_journal(name)
            .ok_or_else(|| unknown_field(kind, name))?;
        field.set_value(value, journal)?;

        if kind == NodeKind::Permission {
            self.permissions.clear();
        }
        self.emit(EventKind::NodeUpdate, oid, kind, None);
        Ok(())
    }

    /// Checks that need the rest of the tree: reference targets and
    /// username uniqueness under `parent`.
    pub(crate) async fn validate_field(
        &mut self,
        parent: Option<Oid>,
        oid: Option<Oid>,
        kind: NodeKind,
        name: &str,
        value: &Value,
    ) -> Result<()> {
        match (kind, name) {
            (NodeKind::UserLocal, "username") => {
                if let (Some(manager), Some(username)) = (parent, value.as_text()) {
                    self.check_unique_username(manager, oid, username).await?;
                }
                Ok(())
            }
            (NodeKind::Permission | NodeKind::UserGroup, "users") => {
                self.check_references(value, NodeKind::UserLocal)
            }
            (NodeKind::Permission, "groups") => self.check_references(value, NodeKind::UserGroup),
            (NodeKind::ViewTree, "user_manager") => {
                self.check_references(value, NodeKind::UserManagerLocal)
            }
            _ => Ok(()),
        }
    }

    fn check_references(&self, value: &Value, expected: NodeKind) -> Result<()> {
        let targets: Vec<Oid> = match value {
            Value::List(items) => items.iter().filter_map(Value::as_ref_oid).collect(),
            other => other.as_ref_oid().into_iter().collect(),
        };
        for target in targets {
            if self.kind_of(target).ok() != Some(expected) {
                return Err(SiptrackError::InvalidData(format!(
                    "{target} is not a {expected}"
                )));
            }
        }
        Ok(())
    }

    async fn check_unique_username(
        &mut self,
        manager: Oid,
        exclude: Option<Oid>,
        username: &str,
    ) -> Result<()> {
        let users: Vec<Oid> = self
            .tree
            .get(manager)
            .map(|b| b.children().to_vec())
            .unwrap_or_default()
            .into_iter()
            .filter(|c| Some(*c) != exclude && self.classes.get(c) == Some(&NodeKind::UserLocal))
            .collect();
        for user in users {
            if self.get_field(user, "username").await?.as_text() == Some(username) {
                return Err(SiptrackError::AlreadyExists(format!(
                    "user '{username}' already exists"
                )));
            }
        }
        Ok(())
    }

    // =========================================================================
    // ATTRIBUTES
    // =========================================================================

    /// Set an attribute's value.
    ///
    /// Versioned attributes append it and keep the newest `max_versions`.
    pub async fn set_attribute_value(
        &mut self,
        oid: Oid,
        value: Value,
        user: Option<&Principal>,
    ) -> Result<()> {
        match self.kind_of(oid)? {
            NodeKind::Attribute => self.set_field(oid, "value", value, user).await,
            NodeKind::VersionedAttribute => {
                let mut values = match self.get_field(oid, "values").await? {
                    Value::List(items) => items,
                    _ => Vec::new(),
                };
                let max = self
                    .get_field(oid, "max_versions")
                    .await?
                    .as_int()
                    .unwrap_or(DEFAULT_MAX_VERSIONS);
                values.push(value);
                let keep = usize::try_from(max.max(1)).unwrap_or(usize::MAX);
                if values.len() > keep {
                    values.drain(..values.len() - keep);
                }
                self.set_field(oid, "values", Value::List(values), user).await
            }
            other => Err(SiptrackError::InvalidOperation(format!(
                "{other} is not an attribute"
            ))),
        }
    }

    /// An attribute's current value; the newest one for versioned
    /// attributes.
    pub async fn attribute_value(&mut self, oid: Oid) -> Result<Value> {
        match self.kind_of(oid)? {
            NodeKind::Attribute => self.get_field(oid, "value").await,
            NodeKind::VersionedAttribute => match self.get_field(oid, "values").await? {
                Value::List(mut items) => Ok(items.pop().unwrap_or_default()),
                _ => Ok(Value::None),
            },
            other => Err(SiptrackError::InvalidOperation(format!(
                "{other} is not an attribute"
            ))),
        }
    }

    // =========================================================================
    // COUNTERS
    // =========================================================================

    pub async fn counter_inc(&mut self, oid: Oid, user: Option<&Principal>) -> Result<i64> {
        self.counter_step(oid, 1, user).await
    }

    pub async fn counter_dec(&mut self, oid: Oid, user: Option<&Principal>) -> Result<i64> {
        self.counter_step(oid, -1, user).await
    }

    async fn counter_step(&mut self, oid: Oid, step: i64, user: Option<&Principal>) -> Result<i64> {
        if self.kind_of(oid)? != NodeKind::Counter {
            return Err(SiptrackError::NonExistent(oid.to_string()));
        }
        let current = self.get_field(oid, "value").await?.as_int().unwrap_or(0);
        let next = current.saturating_add(step);
        self.set_field(oid, "value", Value::Int(next), user).await?;
        Ok(next)
    }
}
