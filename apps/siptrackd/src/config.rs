//! # Configuration
//!
//! Layered configuration for the server binary:
//! built-in defaults, then the TOML file, then `SIPTRACKD_*` environment
//! variables, then command line flags.
//!
//! ```toml
//! [storage]
//! backend = "redb"
//! path = "/var/lib/siptrackd/siptrack.redb"
//! readonly = false
//!
//! [store]
//! preload = true
//! permissive_acl = false
//!
//! [logging]
//! format = "json"
//! ```

use serde::Deserialize;
use siptrack_core::{
    MemoryStorage, ObjectStore, RedbStorage, SiptrackError, Storage, StoreOptions,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const ENV_DB: &str = "SIPTRACKD_DB";
pub const ENV_BACKEND: &str = "SIPTRACKD_BACKEND";
pub const ENV_READONLY: &str = "SIPTRACKD_READONLY";
pub const ENV_LOG_FORMAT: &str = "SIPTRACKD_LOG_FORMAT";

pub const DEFAULT_DB_PATH: &str = "siptrack.redb";

// =============================================================================
// SECTIONS
// =============================================================================

/// Which storage implementation backs the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Redb,
    Memory,
}

impl FromStr for Backend {
    type Err = SiptrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redb" => Ok(Backend::Redb),
            "memory" => Ok(Backend::Memory),
            other => Err(SiptrackError::InvalidData(format!(
                "unknown storage backend '{other}', expected redb or memory"
            ))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Redb => write!(f, "redb"),
            Backend::Memory => write!(f, "memory"),
        }
    }
}

/// Log line formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = SiptrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(SiptrackError::InvalidData(format!(
                "unknown log format '{other}', expected text or json"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,
    pub path: PathBuf,
    pub readonly: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            path: PathBuf::from(DEFAULT_DB_PATH),
            readonly: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

// =============================================================================
// CONFIG
// =============================================================================

/// The complete server configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub storage: StorageConfig,
    pub store: StoreOptions,
    pub logging: LoggingConfig,
}

/// Flag-level overrides, applied last.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub database: Option<PathBuf>,
    pub backend: Option<Backend>,
    pub readonly: bool,
}

impl Config {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml(text: &str) -> Result<Self, SiptrackError> {
        toml::from_str(text)
            .map_err(|e| SiptrackError::Serialization(format!("invalid config: {e}")))
    }

    /// Read the config file at `path`, or the defaults without one.
    pub fn load(path: Option<&Path>) -> Result<Self, SiptrackError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            SiptrackError::InvalidData(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    /// Apply the process environment.
    pub fn apply_env(&mut self) -> Result<(), SiptrackError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), SiptrackError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DB).filter(|p| !p.is_empty()) {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(backend) = lookup(ENV_BACKEND) {
            self.storage.backend = backend.parse()?;
        }
        if let Some(readonly) = lookup(ENV_READONLY) {
            self.storage.readonly = parse_flag(ENV_READONLY, &readonly)?;
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.logging.format = format.parse()?;
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(path) = &overrides.database {
            self.storage.path.clone_from(path);
        }
        if let Some(backend) = overrides.backend {
            self.storage.backend = backend;
        }
        if overrides.readonly {
            self.storage.readonly = true;
        }
    }

    /// Open the configured backend and load the object store from it.
    pub async fn open_store(&self) -> Result<ObjectStore, SiptrackError> {
        let storage: Box<dyn Storage> = match (self.storage.backend, self.storage.readonly) {
            (Backend::Redb, false) => Box::new(RedbStorage::open(&self.storage.path)?),
            (Backend::Redb, true) => Box::new(RedbStorage::open_readonly(&self.storage.path)?),
            (Backend::Memory, false) => Box::new(MemoryStorage::new()),
            (Backend::Memory, true) => Box::new(MemoryStorage::new().into_readonly()),
        };
        ObjectStore::open(storage, self.store).await
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, SiptrackError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(SiptrackError::InvalidData(format!(
            "{key}: expected a boolean, got '{other}'"
        ))),
    }
}
