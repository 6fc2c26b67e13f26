//! # Domain Nodes
//!
//! The object bound to a branch once it has been materialized.
//!
//! A node is first built in skeleton form (oid, kind, empty fields), then
//! either `created` (brand new: defaults, validation, `create_node` action)
//! or `loaded` (existing: fields hydrated from preloaded data, or lazily
//! from the backend on first access).
//!
//! Kind-specific data lives in [`NodeData`]; every field is a
//! [`Field<T>`] reachable by name through [`StoredField`].

use crate::field::{DataMap, Field, StoredField};
use crate::journal::{Journal, StorageAction, now_secs};
use crate::primitives::{ATTRIBUTE_TYPES, DEFAULT_MAX_VERSIONS};
use crate::registry::NodeKind;
use crate::types::{Oid, Result, SiptrackError, Value};
use std::collections::BTreeMap;

// =============================================================================
// CONSTRUCTOR ARGUMENTS
// =============================================================================

/// Named initial field values passed to `add`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeArgs(BTreeMap<String, Value>);

impl NodeArgs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

// =============================================================================
// VALIDATORS
// =============================================================================

fn valid_atype(atype: &String) -> Result<()> {
    if ATTRIBUTE_TYPES.contains(&atype.as_str()) {
        Ok(())
    } else {
        Err(SiptrackError::InvalidData(format!(
            "invalid attribute type '{atype}'"
        )))
    }
}

fn non_empty(text: &String) -> Result<()> {
    if text.is_empty() {
        return Err(SiptrackError::InvalidData("empty text value".to_string()));
    }
    Ok(())
}

fn positive(value: &i64) -> Result<()> {
    if *value < 1 {
        return Err(SiptrackError::InvalidData(format!(
            "expected a positive number, got {value}"
        )));
    }
    Ok(())
}

/// Check that `value` is of the attribute type `atype`.
pub fn check_attribute_value(atype: &str, value: &Value) -> Result<()> {
    let matches = matches!(
        (atype, value),
        ("text", Value::Text(_))
            | ("binary", Value::Binary(_))
            | ("int", Value::Int(_))
            | ("bool", Value::Bool(_))
    );
    if matches {
        Ok(())
    } else {
        Err(SiptrackError::InvalidData(format!(
            "attribute value of type {} does not match atype '{atype}'",
            value.type_name()
        )))
    }
}

// =============================================================================
// KIND-SPECIFIC DATA
// =============================================================================

/// Per-kind fields of a node.
#[derive(Debug, Clone)]
pub enum NodeData {
    /// Kinds with no fields of their own.
    Plain,
    ViewTree {
        user_manager: Field<Oid>,
    },
    Attribute {
        name: Field<String>,
        atype: Field<String>,
        value: Field<Value>,
    },
    VersionedAttribute {
        name: Field<String>,
        atype: Field<String>,
        values: Field<Vec<Value>>,
        max_versions: Field<i64>,
    },
    Permission {
        read_access: Field<bool>,
        write_access: Field<bool>,
        users: Field<Vec<Oid>>,
        groups: Field<Vec<Oid>>,
        all_users: Field<bool>,
        recursive: Field<bool>,
    },
    UserLocal {
        username: Field<String>,
        administrator: Field<bool>,
    },
    UserGroup {
        users: Field<Vec<Oid>>,
    },
    Counter {
        value: Field<i64>,
    },
}

impl NodeData {
    fn for_kind(kind: NodeKind) -> Self {
        match kind {
            NodeKind::ViewTree => NodeData::ViewTree {
                user_manager: Field::new("user_manager"),
            },
            NodeKind::Attribute => NodeData::Attribute {
                name: Field::new("name").with_validator(non_empty),
                atype: Field::new("atype").with_validator(valid_atype),
                value: Field::new("value"),
            },
            NodeKind::VersionedAttribute => NodeData::VersionedAttribute {
                name: Field::new("name").with_validator(non_empty),
                atype: Field::new("atype").with_validator(valid_atype),
                values: Field::new("values"),
                max_versions: Field::new("max_versions").with_validator(positive),
            },
            NodeKind::Permission => NodeData::Permission {
                read_access: Field::new("read_access"),
                write_access: Field::new("write_access"),
                users: Field::new("users"),
                groups: Field::new("groups"),
                all_users: Field::new("all_users"),
                recursive: Field::new("recursive"),
            },
            NodeKind::UserLocal => NodeData::UserLocal {
                username: Field::new("username").with_validator(non_empty),
                administrator: Field::new("administrator"),
            },
            NodeKind::UserGroup => NodeData::UserGroup {
                users: Field::new("users"),
            },
            NodeKind::Counter => NodeData::Counter {
                value: Field::new("value"),
            },
            NodeKind::View
            | NodeKind::DeviceTree
            | NodeKind::DeviceCategory
            | NodeKind::Device
            | NodeKind::ContainerTree
            | NodeKind::Container
            | NodeKind::UserManagerLocal => NodeData::Plain,
        }
    }

    fn fields(&self) -> Vec<&dyn StoredField> {
        match self {
            NodeData::Plain => Vec::new(),
            NodeData::ViewTree { user_manager } => vec![user_manager],
            NodeData::Attribute { name, atype, value } => vec![name, atype, value],
            NodeData::VersionedAttribute {
                name,
                atype,
                values,
                max_versions,
            } => vec![name, atype, values, max_versions],
            NodeData::Permission {
                read_access,
                write_access,
                users,
                groups,
                all_users,
                recursive,
            } => vec![read_access, write_access, users, groups, all_users, recursive],
            NodeData::UserLocal {
                username,
                administrator,
            } => vec![username, administrator],
            NodeData::UserGroup { users } => vec![users],
            NodeData::Counter { value } => vec![value],
        }
    }

    fn fields_mut(&mut self) -> Vec<&mut dyn StoredField> {
        match self {
            NodeData::Plain => Vec::new(),
            NodeData::ViewTree { user_manager } => vec![user_manager],
            NodeData::Attribute { name, atype, value } => vec![name, atype, value],
            NodeData::VersionedAttribute {
                name,
                atype,
                values,
                max_versions,
            } => vec![name, atype, values, max_versions],
            NodeData::Permission {
                read_access,
                write_access,
                users,
                groups,
                all_users,
                recursive,
            } => vec![read_access, write_access, users, groups, all_users, recursive],
            NodeData::UserLocal {
                username,
                administrator,
            } => vec![username, administrator],
            NodeData::UserGroup { users } => vec![users],
            NodeData::Counter { value } => vec![value],
        }
    }
}

// =============================================================================
// NODE
// =============================================================================

/// A materialized domain node.
#[derive(Debug, Clone)]
pub struct Node {
    oid: Oid,
    kind: NodeKind,
    removed: bool,
    journal: Journal,
    ctime: Field<i64>,
    data: NodeData,
}

impl Node {
    /// Skeleton form: oid and kind only, every field unloaded.
    #[must_use]
    pub fn skeleton(oid: Oid, kind: NodeKind) -> Self {
        Self {
            oid,
            kind,
            removed: false,
            journal: Journal::new(),
            ctime: Field::new("ctime"),
            data: NodeData::for_kind(kind),
        }
    }

    /// Build a node from constructor arguments, validating each.
    pub fn construct(oid: Oid, kind: NodeKind, args: NodeArgs) -> Result<Self> {
        let mut node = Self::skeleton(oid, kind);
        for (name, value) in args.0 {
            let field = node
                .data
                .fields_mut()
                .into_iter()
                .find(|f| f.name() == name)
                .ok_or_else(|| {
                    SiptrackError::InvalidData(format!("unknown field '{name}' for {kind}"))
                })?;
            field.prime_value(value)?;
        }

        if let NodeData::Attribute { atype, value, .. } = &mut node.data
            && let Some(Some(atype)) = atype.peek()
        {
            if let Some(Some(v)) = value.peek() {
                check_attribute_value(atype, v)?;
            }
            let binary = atype == "binary";
            value.set_uncached(binary);
        }
        Ok(node)
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn class_id(&self) -> &'static str {
        self.kind.class_id()
    }

    pub fn class_name(&self) -> &'static str {
        self.kind.class_name()
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn modtime(&self) -> i64 {
        self.journal.modtime()
    }

    pub fn pending_actions(&self) -> &[StorageAction] {
        self.journal.actions()
    }

    pub fn journal_mut(&mut self) -> &mut Journal {
        &mut self.journal
    }

    /// Names of every stored field, `ctime` first.
    pub fn field_names(&self) -> Vec<&'static str> {
        std::iter::once(self.ctime.name())
            .chain(self.data.fields().into_iter().map(|f| f.name()))
            .collect()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field_names().contains(&name)
    }

    /// In-memory value of a field; `None` when the field is unknown or not
    /// loaded yet.
    pub fn peek_field(&self, name: &str) -> Option<Value> {
        if name == self.ctime.name() {
            return self.ctime.peek_value();
        }
        self.data
            .fields()
            .into_iter()
            .find(|f| f.name() == name)
            .and_then(|f| f.peek_value())
    }

    /// A field together with the journal its writes go to.
    pub fn field_and_journal(
        &mut self,
        name: &str,
    ) -> Option<(&mut dyn StoredField, &mut Journal)> {
        let Node {
            ctime,
            data,
            journal,
            ..
        } = self;
        let field: &mut dyn StoredField = if name == ctime.name() {
            ctime
        } else {
            data.fields_mut().into_iter().find(|f| f.name() == name)?
        };
        Some((field, journal))
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// First-time initialization of a brand new node.
    ///
    /// Queues `create_node` first so every field write that follows lands
    /// on an existing oid.
    pub fn created(&mut self, parent: Option<Oid>) -> Result<()> {
        self.apply_defaults()?;
        self.journal.push(StorageAction::CreateNode { parent });
        self.ctime.set(Some(now_secs()), &mut self.journal)?;
        let Node { data, journal, .. } = self;
        for field in data.fields_mut() {
            field.commit(journal)?;
        }
        Ok(())
    }

    fn apply_defaults(&mut self) -> Result<()> {
        match &mut self.data {
            NodeData::Attribute { name, atype, .. } => {
                require(name.peek(), "attribute name")?;
                require(atype.peek(), "attribute type")?;
            }
            NodeData::VersionedAttribute {
                name,
                atype,
                values,
                max_versions,
            } => {
                require(name.peek(), "attribute name")?;
                require(atype.peek(), "attribute type")?;
                if !matches!(values.peek(), Some(Some(_))) {
                    values.prime(Vec::new())?;
                }
                if !matches!(max_versions.peek(), Some(Some(_))) {
                    max_versions.prime(DEFAULT_MAX_VERSIONS)?;
                }
            }
            NodeData::UserLocal {
                username,
                administrator,
            } => {
                require(username.peek(), "username")?;
                if !matches!(administrator.peek(), Some(Some(_))) {
                    administrator.prime(false)?;
                }
            }
            NodeData::Counter { value } => {
                if !matches!(value.peek(), Some(Some(_))) {
                    value.prime(0)?;
                }
            }
            NodeData::Permission {
                read_access,
                write_access,
                all_users,
                recursive,
                ..
            } => {
                for flag in [read_access, write_access, all_users, recursive] {
                    if !matches!(flag.peek(), Some(Some(_))) {
                        flag.prime(false)?;
                    }
                }
            }
            NodeData::Plain | NodeData::ViewTree { .. } | NodeData::UserGroup { .. } => {}
        }
        Ok(())
    }

    /// Hydrate an existing node; `None` leaves every field to load lazily.
    pub fn loaded(&mut self, data: Option<&DataMap>) -> Result<()> {
        let Some(data) = data else {
            return Ok(());
        };
        self.ctime.preload(data)?;
        if let NodeData::Attribute { value, .. } = &mut self.data {
            let binary = data.get("atype").and_then(|v| v.as_text()) == Some("binary");
            value.set_uncached(binary);
        }
        for field in self.data.fields_mut() {
            field.preload(data)?;
        }
        Ok(())
    }

    /// Flag the node removed and queue `remove_node`.
    pub fn mark_removed(&mut self) {
        self.removed = true;
        self.journal.touch();
        self.journal.push(StorageAction::RemoveNode);
    }
}

fn require<T>(value: Option<Option<&T>>, what: &str) -> Result<()> {
    match value {
        Some(Some(_)) => Ok(()),
        _ => Err(SiptrackError::MissingData(what.to_string())),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn attribute_args(atype: &str, value: Value) -> NodeArgs {
        NodeArgs::new()
            .with("name", "name")
            .with("atype", atype)
            .with("value", value)
    }

    #[test]
    fn construct_rejects_unknown_fields() {
        let err = Node::construct(Oid(1), NodeKind::Device, NodeArgs::new().with("x", 1i64))
            .expect_err("device has no fields");
        assert!(matches!(err, SiptrackError::InvalidData(_)));
    }

    #[test]
    fn construct_checks_attribute_value_type() {
        assert!(Node::construct(Oid(1), NodeKind::Attribute, attribute_args("int", 4i64.into())).is_ok());
        let err = Node::construct(
            Oid(1),
            NodeKind::Attribute,
            attribute_args("int", Value::from("four")),
        )
        .expect_err("mismatch");
        assert!(matches!(err, SiptrackError::InvalidData(_)));
    }

    #[test]
    fn created_queues_create_before_writes() {
        let mut node = Node::construct(
            Oid(3),
            NodeKind::Attribute,
            attribute_args("text", Value::from("sw1")),
        )
        .expect("construct");
        node.created(Some(Oid(2))).expect("created");

        let actions = node.pending_actions();
        assert_eq!(actions[0], StorageAction::CreateNode { parent: Some(Oid(2)) });
        let written: Vec<&str> = actions[1..]
            .iter()
            .filter_map(|a| match a {
                StorageAction::WriteData { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(written, vec!["ctime", "name", "atype", "value"]);
        assert_eq!(node.peek_field("value"), Some(Value::from("sw1")));
    }

    #[test]
    fn created_requires_attribute_identity() {
        let mut node =
            Node::construct(Oid(3), NodeKind::Attribute, NodeArgs::new()).expect("construct");
        assert!(matches!(
            node.created(None),
            Err(SiptrackError::MissingData(_))
        ));
    }

    #[test]
    fn binary_attribute_value_is_not_kept_in_memory() {
        let mut node = Node::construct(
            Oid(3),
            NodeKind::Attribute,
            attribute_args("binary", Value::Binary(vec![0; 64])),
        )
        .expect("construct");
        node.created(None).expect("created");
        assert_eq!(node.peek_field("value"), None);
        assert!(
            node.pending_actions()
                .iter()
                .any(|a| matches!(a, StorageAction::WriteData { name, .. } if name == "value"))
        );
    }

    #[test]
    fn defaults_fill_in_permission_flags_and_counter() {
        let mut perm = Node::skeleton(Oid(5), NodeKind::Permission);
        perm.created(None).expect("created");
        assert_eq!(perm.peek_field("recursive"), Some(Value::Bool(false)));
        assert_eq!(perm.peek_field("users"), None);

        let mut counter = Node::skeleton(Oid(6), NodeKind::Counter);
        counter.created(None).expect("created");
        assert_eq!(counter.peek_field("value"), Some(Value::Int(0)));
    }

    #[test]
    fn loaded_preloads_fields() {
        let mut data = DataMap::new();
        data.insert("username".into(), Value::from("alice"));
        data.insert("administrator".into(), Value::Bool(true));
        data.insert("ctime".into(), Value::Int(1_700_000_000));

        let mut node = Node::skeleton(Oid(8), NodeKind::UserLocal);
        node.loaded(Some(&data)).expect("loaded");
        assert_eq!(node.peek_field("username"), Some(Value::from("alice")));
        assert_eq!(node.peek_field("ctime"), Some(Value::Int(1_700_000_000)));
        assert!(node.pending_actions().is_empty());
    }

    #[test]
    fn mark_removed_queues_remove_node() {
        let mut node = Node::skeleton(Oid(9), NodeKind::Device);
        node.mark_removed();
        assert!(node.is_removed());
        assert_eq!(node.pending_actions(), &[StorageAction::RemoveNode]);
    }

    #[test]
    fn field_names_start_with_ctime() {
        let node = Node::skeleton(Oid(1), NodeKind::Permission);
        let names = node.field_names();
        assert_eq!(names[0], "ctime");
        assert!(node.has_field("recursive"));
        assert!(!node.has_field("username"));
    }
}
