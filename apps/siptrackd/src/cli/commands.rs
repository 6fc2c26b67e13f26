//! # CLI Command Implementations
//!
//! Each command opens the configured store, runs one operation and commits
//! whatever that operation queued.

use crate::config::{Backend, Config};
use siptrack_core::{
    NodeArgs, NodeFilter, NodeKind, ObjectStore, Oid, Principal, SiptrackError, Value,
};
use std::collections::BTreeMap;

/// Everything a command needs besides its own arguments.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: Config,
    pub json_mode: bool,
    pub as_user: Option<String>,
}

fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

// =============================================================================
// VALUE PARSING
// =============================================================================

/// Marks a value as literal text, e.g. `str:8080` or `str:none`.
pub const TEXT_PREFIX: &str = "str:";

/// Parse a command line value.
///
/// `true`/`false` are booleans, integers are ints, `@12` is a reference,
/// `@1,@2` a reference list and `none` clears the field. Anything else,
/// and anything behind `str:`, is text.
pub fn parse_value(raw: &str) -> Result<Value, SiptrackError> {
    if let Some(text) = raw.strip_prefix(TEXT_PREFIX) {
        return Ok(Value::from(text));
    }
    match raw {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "none" => return Ok(Value::None),
        _ => {}
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Ok(Value::Int(int));
    }
    if raw.starts_with('@') {
        let refs = raw
            .split(',')
            .map(|part| {
                part.strip_prefix('@')
                    .ok_or_else(|| SiptrackError::InvalidData(format!("bad reference '{part}'")))
                    .and_then(str::parse::<Oid>)
                    .map(Value::Ref)
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(if raw.contains(',') {
            Value::List(refs)
        } else {
            refs.into_iter().next().unwrap_or_default()
        });
    }
    Ok(Value::from(raw))
}

/// Parse a value bound for an attribute of type `atype`.
///
/// Text attributes only hold text, so the raw string is kept as is.
pub fn parse_attribute_value(raw: &str, atype: &str) -> Result<Value, SiptrackError> {
    if atype == "text" {
        Ok(Value::from(raw.strip_prefix(TEXT_PREFIX).unwrap_or(raw)))
    } else {
        parse_value(raw)
    }
}

/// Parse `name=value` pairs into constructor arguments.
///
/// With `atype=text` among them, `value` is read as text.
pub fn parse_args(args: &[String]) -> Result<NodeArgs, SiptrackError> {
    let mut pairs = Vec::with_capacity(args.len());
    for arg in args {
        let (name, raw) = arg.split_once('=').ok_or_else(|| {
            SiptrackError::InvalidData(format!("expected name=value, got '{arg}'"))
        })?;
        pairs.push((name.trim(), raw));
    }
    let atype = pairs
        .iter()
        .find(|(name, _)| *name == "atype")
        .map(|&(_, raw)| raw.strip_prefix(TEXT_PREFIX).unwrap_or(raw));

    let mut parsed = NodeArgs::new();
    for (name, raw) in pairs {
        let value = match atype {
            Some(atype) if name == "value" => parse_attribute_value(raw, atype)?,
            _ => parse_value(raw)?,
        };
        parsed.insert(name, value);
    }
    Ok(parsed)
}

fn value_json(value: &Value) -> serde_json::Value {
    match value {
        Value::None => serde_json::Value::Null,
        Value::Bool(b) => serde_json::json!(b),
        Value::Int(i) => serde_json::json!(i),
        Value::Text(s) => serde_json::json!(s),
        Value::Binary(bytes) => serde_json::json!({ "binary": bytes.len() }),
        Value::Ref(oid) => serde_json::json!({ "oid": oid.0 }),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_json).collect()),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// The principal named by `--as-user`; `None` acts as the system.
async fn principal(
    store: &mut ObjectStore,
    ctx: &Context,
) -> Result<Option<Principal>, SiptrackError> {
    let Some(username) = ctx.as_user.as_deref() else {
        return Ok(None);
    };
    let user = store
        .find_user(username)
        .await?
        .ok_or_else(|| SiptrackError::NonExistent(format!("user '{username}'")))?;
    Ok(Some(store.principal_for(user).await?))
}

/// Short display name: the `name` attribute, or the identifying field of
/// attributes and users.
async fn label(store: &mut ObjectStore, oid: Oid) -> Result<String, SiptrackError> {
    let value = match store.kind_of(oid)? {
        NodeKind::Attribute | NodeKind::VersionedAttribute => {
            let name = store.get_field(oid, "name").await?;
            let value = store.attribute_value(oid).await?;
            return Ok(format!("{name} = {value}"));
        }
        NodeKind::UserLocal => store.get_field(oid, "username").await?,
        _ => store.get_attribute_value(oid, "name", Value::None).await?,
    };
    Ok(if value.is_none() {
        String::new()
    } else {
        value.to_string()
    })
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create a store and bootstrap it.
pub async fn cmd_init(ctx: &Context, force: bool) -> Result<(), SiptrackError> {
    let path = &ctx.config.storage.path;
    if ctx.config.storage.backend == Backend::Redb && path.exists() {
        if !force {
            return Err(SiptrackError::AlreadyExists(format!(
                "database {} already exists, use --force to overwrite",
                path.display()
            )));
        }
        std::fs::remove_file(path).map_err(|e| {
            SiptrackError::Storage(format!("cannot remove {}: {e}", path.display()))
        })?;
    }

    let store = ctx.config.open_store().await?;
    if ctx.json_mode {
        print_json(&serde_json::json!({
            "database": path.to_string_lossy(),
            "backend": ctx.config.storage.backend.to_string(),
            "nodes": store.len(),
        }));
    } else {
        println!(
            "Initialized new {} store at {} ({} nodes)",
            ctx.config.storage.backend,
            path.display(),
            store.len()
        );
    }
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Node counts per kind and the active user manager.
pub async fn cmd_status(ctx: &Context) -> Result<(), SiptrackError> {
    let mut store = ctx.config.open_store().await?;
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    let oids: Vec<Oid> = store.tree().oids().collect();
    for oid in oids {
        *counts.entry(store.kind_of(oid)?.class_name()).or_default() += 1;
    }
    let manager = store.user_manager().await?;

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "database": ctx.config.storage.path.to_string_lossy(),
            "backend": ctx.config.storage.backend.to_string(),
            "readonly": store.storage().is_readonly(),
            "nodes": store.len(),
            "next_oid": store.registry().next_oid(),
            "user_manager": manager.map(|m| m.0),
            "kinds": counts,
        }));
        return Ok(());
    }

    println!("siptrackd Store Status");
    println!("======================");
    println!("Database: {}", ctx.config.storage.path.display());
    println!("Backend:  {}", ctx.config.storage.backend);
    println!("Readonly: {}", store.storage().is_readonly());
    println!();
    println!("Nodes:        {}", store.len());
    println!("Next oid:     {}", store.registry().next_oid());
    match manager {
        Some(m) => println!("User manager: {m}"),
        None => println!("User manager: none"),
    }
    println!();
    for (class, count) in counts {
        println!("  {class:<20} {count}");
    }
    Ok(())
}

// =============================================================================
// TREE COMMAND
// =============================================================================

/// Indented dump of the subtree at `oid`.
pub async fn cmd_tree(ctx: &Context, oid: u64, depth: Option<usize>) -> Result<(), SiptrackError> {
    let mut store = ctx.config.open_store().await?;
    let user = principal(&mut store, ctx).await?;
    let visited = store
        .traverse(Oid(oid), true, depth, &NodeFilter::new(), user.as_ref())
        .await?;

    let mut rows = Vec::with_capacity(visited.len());
    for (level, node) in visited {
        let kind = store.kind_of(node)?;
        let label = label(&mut store, node).await?;
        rows.push((level, node, kind, label));
    }

    if ctx.json_mode {
        let nodes: Vec<serde_json::Value> = rows
            .iter()
            .map(|(level, node, kind, label)| {
                serde_json::json!({
                    "depth": level,
                    "oid": node.0,
                    "class": kind.class_name(),
                    "label": label,
                })
            })
            .collect();
        print_json(&serde_json::json!({ "nodes": nodes }));
        return Ok(());
    }

    for (level, node, kind, label) in rows {
        println!("{}{node} [{kind}] {label}", "  ".repeat(level));
    }
    Ok(())
}

// =============================================================================
// SHOW COMMAND
// =============================================================================

/// Fields and edges of one node.
pub async fn cmd_show(ctx: &Context, oid: u64) -> Result<(), SiptrackError> {
    let mut store = ctx.config.open_store().await?;
    let user = principal(&mut store, ctx).await?;
    let oid = Oid(oid);

    let (kind, modtime, names) = {
        let node = store.get_oid(oid, &[], user.as_ref()).await?;
        (node.kind(), node.modtime(), node.field_names())
    };
    let mut fields = Vec::with_capacity(names.len());
    for name in names {
        fields.push((name, store.read_field(oid, name, user.as_ref()).await?));
    }
    let (parent, children, associations, references) = match store.tree().get(oid) {
        Some(b) => (
            b.parent(),
            b.children().to_vec(),
            b.associations().to_vec(),
            b.references().to_vec(),
        ),
        None => return Err(SiptrackError::NonExistent(oid.to_string())),
    };

    if ctx.json_mode {
        let ids = |oids: &[Oid]| oids.iter().map(|o| o.0).collect::<Vec<_>>();
        let field_map: serde_json::Map<String, serde_json::Value> = fields
            .iter()
            .map(|(name, value)| ((*name).to_string(), value_json(value)))
            .collect();
        print_json(&serde_json::json!({
            "oid": oid.0,
            "class": kind.class_name(),
            "class_id": kind.class_id(),
            "modtime": modtime,
            "parent": parent.map(|p| p.0),
            "children": ids(&children),
            "associations": ids(&associations),
            "references": ids(&references),
            "fields": field_map,
        }));
        return Ok(());
    }

    println!("{oid} [{kind}]");
    match parent {
        Some(p) => println!("  parent:       {p}"),
        None => println!("  parent:       none"),
    }
    println!("  children:     {}", children.len());
    println!("  associations: {associations:?}");
    println!("  references:   {references:?}");
    println!("  modtime:      {modtime}");
    for (name, value) in fields {
        println!("  {name:<14}{value}");
    }
    Ok(())
}

// =============================================================================
// MUTATING COMMANDS
// =============================================================================

/// Create a node under `parent` and commit it.
pub async fn cmd_add(
    ctx: &Context,
    parent: u64,
    class: &str,
    args: &[String],
) -> Result<(), SiptrackError> {
    let args = parse_args(args)?;
    let mut store = ctx.config.open_store().await?;
    let user = principal(&mut store, ctx).await?;
    let oid = store.add(Oid(parent), class, args, user.as_ref()).await?;
    store.commit(&[oid]).await?;

    if ctx.json_mode {
        print_json(&serde_json::json!({ "oid": oid.0, "class": class }));
    } else {
        println!("Added {class} {oid} under {parent}");
    }
    Ok(())
}

/// Set one field; `value` on attributes goes through the attribute rules.
pub async fn cmd_set(ctx: &Context, oid: u64, field: &str, raw: &str) -> Result<(), SiptrackError> {
    let mut store = ctx.config.open_store().await?;
    let user = principal(&mut store, ctx).await?;
    let oid = Oid(oid);

    if field == "value" && store.kind_of(oid)?.is_attribute() {
        let atype = store.read_field(oid, "atype", user.as_ref()).await?;
        let value = match atype.as_text() {
            Some(atype) => parse_attribute_value(raw, atype)?,
            None => parse_value(raw)?,
        };
        store.set_attribute_value(oid, value, user.as_ref()).await?;
    } else {
        store.set_field(oid, field, parse_value(raw)?, user.as_ref()).await?;
    }
    store.commit(&[oid]).await?;

    if ctx.json_mode {
        print_json(&serde_json::json!({ "oid": oid.0, "field": field }));
    } else {
        println!("Set {field} on {oid}");
    }
    Ok(())
}

/// Remove a node and commit every node the removal touched.
pub async fn cmd_remove(ctx: &Context, oid: u64, recursive: bool) -> Result<(), SiptrackError> {
    let mut store = ctx.config.open_store().await?;
    let user = principal(&mut store, ctx).await?;
    let affected = store.remove(Oid(oid), recursive, user.as_ref()).await?;
    store.commit(&affected).await?;

    if ctx.json_mode {
        let ids: Vec<u64> = affected.iter().map(|o| o.0).collect();
        print_json(&serde_json::json!({ "removed": oid, "committed": ids }));
    } else {
        println!("Removed {oid}, committed {} nodes", affected.len());
    }
    Ok(())
}

/// Read every field of every node, which heals dangling references, and
/// commit whatever got queued.
pub async fn cmd_commit(ctx: &Context) -> Result<(), SiptrackError> {
    let mut store = ctx.config.open_store().await?;
    let oids: Vec<Oid> = store.tree().oids().collect();
    for oid in oids {
        let names = store.get_oid(oid, &[], None).await?.field_names();
        for name in names {
            store.get_field(oid, name).await?;
        }
    }
    let committed = store.commit_pending().await?;

    if ctx.json_mode {
        print_json(&serde_json::json!({ "committed": committed }));
    } else {
        println!("Committed {committed} nodes");
    }
    Ok(())
}
