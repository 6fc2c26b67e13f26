//! # siptrackd CLI Module
//!
//! Operator commands that drive the object store directly.
//!
//! ## Available Commands
//!
//! - `init` - Create and bootstrap a new store
//! - `status` - Show store status
//! - `tree` - Dump the object tree
//! - `show` - Inspect one node and its fields
//! - `add` - Create a node and commit it
//! - `set` - Set a field and commit it
//! - `remove` - Remove a node and commit the removal
//! - `commit` - Load every node, heal dangling references and commit

mod commands;

use crate::config::{Backend, Config, Overrides};
use clap::{Parser, Subcommand};
use siptrack_core::SiptrackError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// siptrackd - IP and device inventory object store
#[derive(Parser, Debug)]
#[command(name = "siptrackd")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the store database (overrides config and SIPTRACKD_DB)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend: "redb" or "memory"
    #[arg(short = 'B', long, global = true)]
    pub backend: Option<String>,

    /// Open the storage readonly
    #[arg(long, global = true)]
    pub readonly: bool,

    /// Act as this local user instead of the system
    #[arg(short = 'u', long, global = true)]
    pub as_user: Option<String>,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create and bootstrap a new store
    Init {
        /// Initialize even if the database file exists
        #[arg(short, long)]
        force: bool,
    },

    /// Show store status
    Status,

    /// Dump the object tree
    Tree {
        /// Start node
        #[arg(short, long, default_value = "0")]
        oid: u64,

        /// Maximum depth below the start node
        #[arg(short, long)]
        depth: Option<usize>,
    },

    /// Inspect one node and its fields
    Show {
        /// Node oid
        oid: u64,
    },

    /// Create a node and commit it
    Add {
        /// Parent oid
        parent: u64,

        /// Class name, e.g. "device" or "attribute"
        class: String,

        /// Field values as name=value (true/false, integers, @oid, @a,@b
        /// for reference lists, str:... or anything else is text; the value
        /// of an atype=text attribute is always text)
        args: Vec<String>,
    },

    /// Set a field and commit it
    Set {
        /// Node oid
        oid: u64,

        /// Field name
        field: String,

        /// New value, same syntax as `add`
        value: String,
    },

    /// Remove a node and commit the removal
    Remove {
        /// Node oid
        oid: u64,

        /// Remove the whole subtree instead of handing children up
        #[arg(short, long)]
        recursive: bool,
    },

    /// Load every node, heal dangling references and commit the result
    Commit,
}

impl Cli {
    /// The flag-level config overrides.
    pub fn overrides(&self) -> Result<Overrides, SiptrackError> {
        let backend = self
            .backend
            .as_deref()
            .map(str::parse::<Backend>)
            .transpose()?;
        Ok(Overrides {
            database: self.database.clone(),
            backend,
            readonly: self.readonly,
        })
    }

    /// Defaults, config file, environment, then flags.
    pub fn resolve_config(&self) -> Result<Config, SiptrackError> {
        let mut config = Config::load(self.config.as_deref())?;
        config.apply_env()?;
        config.apply_overrides(&self.overrides()?);
        Ok(config)
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments and a resolved config.
pub async fn execute(cli: Cli, config: Config) -> Result<(), SiptrackError> {
    let ctx = Context {
        config,
        json_mode: cli.json_mode,
        as_user: cli.as_user,
    };

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(&ctx, force).await,
        Some(Commands::Status) | None => cmd_status(&ctx).await,
        Some(Commands::Tree { oid, depth }) => cmd_tree(&ctx, oid, depth).await,
        Some(Commands::Show { oid }) => cmd_show(&ctx, oid).await,
        Some(Commands::Add {
            parent,
            class,
            args,
        }) => cmd_add(&ctx, parent, &class, &args).await,
        Some(Commands::Set { oid, field, value }) => cmd_set(&ctx, oid, &field, &value).await,
        Some(Commands::Remove { oid, recursive }) => cmd_remove(&ctx, oid, recursive).await,
        Some(Commands::Commit) => cmd_commit(&ctx).await,
    }
}
