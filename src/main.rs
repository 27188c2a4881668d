//! Wagerbook Server Binary
//!
//! Loads configuration, opens the ledger (finishing interrupted settlements)
//! and serves the HTTP API.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use wagerbook::api::ApiServer;
use wagerbook::{ConfigLoader, Ledger};

#[derive(Parser, Debug)]
#[command(name = "wagerbook")]
#[command(about = "Wagering ledger and settlement server", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API server host
    #[arg(long)]
    host: Option<String>,

    /// API server port
    #[arg(long)]
    port: Option<u16>,

    /// Database directory
    #[arg(long)]
    db_path: Option<String>,

    /// Wipe the database before starting (development only)
    #[arg(long)]
    clear_db: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(ref path) = args.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;

    if let Some(host) = args.host {
        config.api.host = host;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if let Some(db_path) = args.db_path {
        config.storage.data_directory = db_path;
    }
    if args.clear_db {
        config.storage.clear_on_start = true;
    }
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.monitoring.log_filter.clone().into()),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting wagerbook");

    let ledger_config = config.clone();
    let ledger = tokio::task::spawn_blocking(move || Ledger::open(&ledger_config)).await??;

    ApiServer::new(config, Arc::new(ledger)).run().await
}
