//! # siptrackd - IP and Device Inventory Server
//!
//! The binary around the siptrack object store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                apps/siptrackd (THE BINARY)           │
//! │                                                      │
//! │   ┌──────────────┐            ┌──────────────────┐   │
//! │   │     CLI      │            │      Config      │   │
//! │   │    (clap)    │            │ (toml/env/flags) │   │
//! │   └──────┬───────┘            └────────┬─────────┘   │
//! │          └──────────────┬──────────────┘             │
//! │                         ▼                            │
//! │                 ┌───────────────┐                    │
//! │                 │ siptrack-core │                    │
//! │                 │ (THE TREE)    │                    │
//! │                 └───────────────┘                    │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! siptrackd init -D /var/lib/siptrackd/siptrack.redb
//! siptrackd status
//! siptrackd add 0 view
//! siptrackd add 4 attribute name=name atype=text value=sw1
//! siptrackd tree --depth 2
//! ```

use clap::Parser;
use siptrackd::cli;
use siptrackd::config::{ENV_LOG_FORMAT, LogFormat};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // Config errors are reported after logging is up, with text output.
    let config = cli.resolve_config();
    let log_format = match &config {
        Ok(config) => config.logging.format,
        Err(_) => std::env::var(ENV_LOG_FORMAT)
            .ok()
            .and_then(|f| f.parse().ok())
            .unwrap_or_default(),
    };
    init_tracing(log_format);

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Error: {}", e);
            std::process::exit(2);
        }
    };

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli, config).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Install the global subscriber; `RUST_LOG` overrides the default filter.
fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "siptrackd=info,siptrack_core=info".into());

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn print_banner() {
    println!("siptrackd v{}", env!("CARGO_PKG_VERSION"));
    println!();
}
