//! Tests for CLI parsing and the commands against a redb store.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use clap::Parser;
use siptrack_core::{NodeKind, Oid, SiptrackError, Value, VIEW_TREE_OID};
use siptrackd::cli::{
    Cli, Commands, Context, cmd_add, cmd_commit, cmd_init, cmd_remove, cmd_set,
    parse_attribute_value, parse_args, parse_value,
};
use siptrackd::config::{Backend, Config};
use std::path::{Path, PathBuf};

fn context(path: &Path) -> Context {
    let mut config = Config::default();
    config.storage.path = path.to_path_buf();
    Context {
        config,
        json_mode: true,
        as_user: None,
    }
}

// =============================================================================
// PARSING
// =============================================================================

#[test]
fn test_parse_add_command() {
    let cli = Cli::try_parse_from([
        "siptrackd",
        "-D",
        "inv.redb",
        "--json-mode",
        "add",
        "4",
        "attribute",
        "name=name",
        "atype=text",
        "value=sw1",
    ])
    .unwrap();

    assert_eq!(cli.database, Some(PathBuf::from("inv.redb")));
    assert!(cli.json_mode);
    match cli.command {
        Some(Commands::Add {
            parent,
            class,
            args,
        }) => {
            assert_eq!(parent, 4);
            assert_eq!(class, "attribute");
            assert_eq!(args, vec!["name=name", "atype=text", "value=sw1"]);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn test_parse_tree_defaults() {
    let cli = Cli::try_parse_from(["siptrackd", "tree"]).unwrap();
    match cli.command {
        Some(Commands::Tree { oid, depth }) => {
            assert_eq!(oid, 0);
            assert_eq!(depth, None);
        }
        other => panic!("unexpected command: {other:?}"),
    }
    assert!(Cli::try_parse_from(["siptrackd", "show"]).is_err());
}

#[test]
fn test_flag_overrides() {
    let cli = Cli::try_parse_from(["siptrackd", "--backend", "memory", "--readonly", "status"])
        .unwrap();
    let overrides = cli.overrides().unwrap();
    assert_eq!(overrides.backend, Some(Backend::Memory));
    assert!(overrides.readonly);

    let cli = Cli::try_parse_from(["siptrackd", "--backend", "sqlite", "status"]).unwrap();
    assert!(cli.overrides().is_err());
}

#[test]
fn test_parse_values() {
    assert_eq!(parse_value("true").unwrap(), Value::Bool(true));
    assert_eq!(parse_value("-3").unwrap(), Value::Int(-3));
    assert_eq!(parse_value("@7").unwrap(), Value::Ref(Oid(7)));
    assert_eq!(
        parse_value("@1,@2").unwrap(),
        Value::List(vec![Value::Ref(Oid(1)), Value::Ref(Oid(2))])
    );
    assert_eq!(parse_value("none").unwrap(), Value::None);
    assert_eq!(parse_value("sw1").unwrap(), Value::from("sw1"));
    assert!(parse_value("@x").is_err());
    assert!(parse_value("@1,2").is_err());

    let args = parse_args(&["username=bob".to_string(), "administrator=false".to_string()])
        .unwrap();
    assert_eq!(args.get("username"), Some(&Value::from("bob")));
    assert_eq!(args.get("administrator"), Some(&Value::Bool(false)));
    assert!(parse_args(&["novalue".to_string()]).is_err());
}

#[test]
fn test_parse_literal_text() {
    assert_eq!(parse_value("str:8080").unwrap(), Value::from("8080"));
    assert_eq!(parse_value("str:none").unwrap(), Value::from("none"));
    assert_eq!(parse_value("str:").unwrap(), Value::from(""));

    assert_eq!(parse_attribute_value("2024", "text").unwrap(), Value::from("2024"));
    assert_eq!(parse_attribute_value("true", "text").unwrap(), Value::from("true"));
    assert_eq!(parse_attribute_value("2024", "int").unwrap(), Value::Int(2024));

    let args = parse_args(&[
        "value=8080".to_string(),
        "atype=text".to_string(),
        "name=port".to_string(),
    ])
    .unwrap();
    assert_eq!(args.get("value"), Some(&Value::from("8080")));

    let args = parse_args(&["atype=int".to_string(), "value=8080".to_string()]).unwrap();
    assert_eq!(args.get("value"), Some(&Value::Int(8080)));
}

// =============================================================================
// COMMANDS
// =============================================================================

#[tokio::test]
async fn test_commands_persist_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("siptrack.redb");
    let ctx = context(&path);

    cmd_init(&ctx, false).await.unwrap();
    assert!(matches!(
        cmd_init(&ctx, false).await,
        Err(SiptrackError::AlreadyExists(_))
    ));

    // Bootstrap used oids 0..=3.
    cmd_add(&ctx, VIEW_TREE_OID.0, "view", &[]).await.unwrap();
    cmd_add(
        &ctx,
        4,
        "attribute",
        &["name=name".to_string(), "atype=text".to_string(), "value=lab".to_string()],
    )
    .await
    .unwrap();
    cmd_set(&ctx, 5, "value", "core").await.unwrap();
    cmd_commit(&ctx).await.unwrap();

    {
        let mut store = ctx.config.open_store().await.unwrap();
        assert_eq!(store.kind_of(Oid(4)).unwrap(), NodeKind::View);
        assert_eq!(
            store
                .get_attribute_value(Oid(4), "name", Value::None)
                .await
                .unwrap(),
            Value::from("core")
        );
    }

    cmd_remove(&ctx, 4, true).await.unwrap();
    let store = ctx.config.open_store().await.unwrap();
    assert!(!store.contains(Oid(4)));
    assert!(!store.contains(Oid(5)));
}

#[tokio::test]
async fn test_text_attribute_takes_numeric_strings() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir.path().join("siptrack.redb"));
    cmd_init(&ctx, false).await.unwrap();

    cmd_add(&ctx, VIEW_TREE_OID.0, "view", &[]).await.unwrap();
    cmd_add(
        &ctx,
        4,
        "attribute",
        &["name=port".to_string(), "atype=text".to_string(), "value=8080".to_string()],
    )
    .await
    .unwrap();
    {
        let mut store = ctx.config.open_store().await.unwrap();
        assert_eq!(
            store.attribute_value(Oid(5)).await.unwrap(),
            Value::from("8080")
        );
    }

    cmd_set(&ctx, 5, "value", "2024").await.unwrap();
    cmd_set(&ctx, 5, "value", "none").await.unwrap();
    let mut store = ctx.config.open_store().await.unwrap();
    assert_eq!(store.attribute_value(Oid(5)).await.unwrap(), Value::from("none"));
}

#[tokio::test]
async fn test_unknown_user_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(&dir.path().join("siptrack.redb"));
    cmd_init(&ctx, false).await.unwrap();

    ctx.as_user = Some("nobody".to_string());
    assert!(matches!(
        cmd_add(&ctx, 0, "view", &[]).await,
        Err(SiptrackError::NonExistent(_))
    ));

    ctx.as_user = Some("admin".to_string());
    cmd_add(&ctx, 0, "view", &[]).await.unwrap();
}
