//! nexus-artifact-rs: reconcile one local file against an artifact in a
//! Sonatype Nexus repository.
//!
//! The file is left alone when recorded install metadata shows it is
//! current. Otherwise the matching asset is downloaded, optionally verified
//! against the registry's checksums, and renamed into place.

#![warn(clippy::all)]

mod cli;
mod config;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use nexus_artifact::metadata;
use nexus_artifact::registry::HttpTransport;
use nexus_artifact::types::LogLevel;
use nexus_artifact::SyncEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    let filter = match cli.log_level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config = config::Config::from_cli(cli)?;
    tracing::debug!(?config, "Starting nexus-artifact-rs");

    let query = config.query();
    let transport = Arc::new(HttpTransport::new(&query)?);
    let store = metadata::open_store(config.metadata);
    tracing::debug!("Using {} metadata store", store.name());

    let mut engine = SyncEngine::new(config.sync_options(), query, transport, store);
    let outcome = engine.reconcile(config.dry_run).await?;

    println!("{}: {}", config.path.display(), outcome);
    Ok(())
}
