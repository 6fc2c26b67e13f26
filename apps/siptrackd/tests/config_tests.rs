//! Tests for configuration layering: defaults, TOML, environment, flags.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use siptrack_core::{SiptrackError, StoreOptions};
use siptrackd::config::{Backend, Config, LogFormat, Overrides};
use std::collections::BTreeMap;
use std::path::PathBuf;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: BTreeMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

// =============================================================================
// DEFAULTS AND TOML
// =============================================================================

#[test]
fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.storage.backend, Backend::Redb);
    assert_eq!(config.storage.path, PathBuf::from("siptrack.redb"));
    assert!(!config.storage.readonly);
    assert_eq!(config.store, StoreOptions::default());
    assert!(config.store.preload);
    assert!(!config.store.permissive_acl);
    assert_eq!(config.logging.format, LogFormat::Text);
}

#[test]
fn test_full_toml() {
    let config = Config::from_toml(
        r#"
        [storage]
        backend = "memory"
        path = "/tmp/st.redb"
        readonly = true

        [store]
        preload = false
        permissive_acl = true

        [logging]
        format = "json"
        "#,
    )
    .unwrap();

    assert_eq!(config.storage.backend, Backend::Memory);
    assert_eq!(config.storage.path, PathBuf::from("/tmp/st.redb"));
    assert!(config.storage.readonly);
    assert!(!config.store.preload);
    assert!(config.store.permissive_acl);
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let config = Config::from_toml("[store]\npermissive_acl = true\n").unwrap();
    assert!(config.store.permissive_acl);
    assert!(config.store.preload);
    assert_eq!(config.storage, Config::default().storage);
}

#[test]
fn test_bad_toml_is_rejected() {
    assert!(matches!(
        Config::from_toml("[storage]\nbackend = \"sqlite\"\n"),
        Err(SiptrackError::Serialization(_))
    ));
    assert!(matches!(
        Config::from_toml("[nonsense]\nkey = 1\n"),
        Err(SiptrackError::Serialization(_))
    ));
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("siptrackd.toml");
    std::fs::write(&path, "[storage]\npath = \"other.redb\"\n").unwrap();

    let config = Config::load(Some(path.as_path())).unwrap();
    assert_eq!(config.storage.path, PathBuf::from("other.redb"));
    assert_eq!(Config::load(None).unwrap(), Config::default());
    assert!(Config::load(Some(dir.path().join("missing.toml").as_path())).is_err());
}

// =============================================================================
// LAYERING
// =============================================================================

#[test]
fn test_env_overrides_file() {
    let mut config = Config::from_toml("[storage]\npath = \"file.redb\"\n").unwrap();
    config
        .apply_env_from(env(&[
            ("SIPTRACKD_DB", "env.redb"),
            ("SIPTRACKD_BACKEND", "memory"),
            ("SIPTRACKD_READONLY", "yes"),
            ("SIPTRACKD_LOG_FORMAT", "json"),
        ]))
        .unwrap();

    assert_eq!(config.storage.path, PathBuf::from("env.redb"));
    assert_eq!(config.storage.backend, Backend::Memory);
    assert!(config.storage.readonly);
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
fn test_invalid_env_values_fail() {
    let mut config = Config::default();
    assert!(
        config
            .apply_env_from(env(&[("SIPTRACKD_READONLY", "maybe")]))
            .is_err()
    );
    assert!(
        config
            .apply_env_from(env(&[("SIPTRACKD_BACKEND", "postgres")]))
            .is_err()
    );
}

#[test]
fn test_flags_override_env() {
    let mut config = Config::default();
    config
        .apply_env_from(env(&[("SIPTRACKD_DB", "env.redb")]))
        .unwrap();
    config.apply_overrides(&Overrides {
        database: Some(PathBuf::from("flag.redb")),
        backend: Some(Backend::Memory),
        readonly: false,
    });

    assert_eq!(config.storage.path, PathBuf::from("flag.redb"));
    assert_eq!(config.storage.backend, Backend::Memory);
    assert!(!config.storage.readonly);
}

#[tokio::test]
async fn test_open_memory_store_bootstraps() {
    let mut config = Config::default();
    config.storage.backend = Backend::Memory;
    let mut store = config.open_store().await.unwrap();
    assert_eq!(store.len(), 4);
    assert!(store.find_user("admin").await.unwrap().is_some());
}
