//! File-root proxy - static file server with a disk-backed TTL cache
//!
//! Serves the configured web root and keeps served bytes in the cache
//! directory so repeat requests skip the origin until the entry expires.

use clap::Parser;
use file_blob_cache::BlobCache;
use fileroot_proxy::cli::{self, Cli, Command};
use fileroot_proxy::{Config, Origin, Result, Server, ServerState, SharedState};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("fileroot_proxy=info".parse()?)
        .add_directive("file_blob_cache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        // Keep stdout clean for the cache subcommands
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    };

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.cmd.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Cache(cmd) => cli::run_cache_command(cmd, &config).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting file-root proxy...");
    info!("Port: {}", config.port);
    info!("Web root: {:?}", config.web_root);
    info!("Cache dir: {:?}", config.cache_dir);
    info!("Cache TTL: {} seconds", config.cache_ttl.as_secs());

    // Provision the origin root; the cache provisions its own directories
    if !config.web_root.exists() {
        tokio::fs::create_dir_all(&config.web_root).await?;
        info!("Created web root {:?}", config.web_root);
    }
    let origin = Origin::new(&config.web_root).await?;

    let cache = BlobCache::new(&config.cache_dir, config.cache_ttl);
    cache.init().await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state: SharedState = Arc::new(ServerState::new(cache, origin, config));
    let server = Server::bind(state, addr).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
