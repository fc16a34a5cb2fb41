//! Command-line interface

use crate::config::Config;
use crate::error::Result;
use clap::{Parser, Subcommand};
use file_blob_cache::{BlobCache, DeleteOutcome};

#[derive(Parser)]
#[command(
    name = "fileroot-proxy",
    version,
    about = "Serve a directory over HTTP with a disk-backed TTL cache"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the server (default)
    Serve,
    /// Inspect or prune the cache directory
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand)]
pub enum CacheCommand {
    /// List cached entries with their size and storage time
    List {
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove one or more entries by key
    Remove {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Remove every expired entry
    Sweep,
}

/// Run a cache maintenance command against the configured cache directory
pub async fn run_cache_command(cmd: CacheCommand, config: &Config) -> Result<()> {
    let cache = BlobCache::new(&config.cache_dir, config.cache_ttl);

    match cmd {
        CacheCommand::List { json } => {
            let mut entries = cache.list().await?;
            entries.sort_by(|a, b| a.key.cmp(&b.key));

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("Cache is empty.");
            } else {
                for entry in &entries {
                    println!(
                        "{}\t{} bytes\t{}",
                        entry.key,
                        entry.size,
                        entry.stored_at.to_rfc3339()
                    );
                }
            }
        }
        CacheCommand::Remove { keys } => {
            for (key, outcome) in cache.delete_many(&keys).await {
                match outcome {
                    DeleteOutcome::Removed => println!("removed\t{}", key),
                    DeleteOutcome::Absent => println!("absent\t{}", key),
                    DeleteOutcome::Failed(reason) => println!("failed\t{}\t{}", key, reason),
                }
            }
        }
        CacheCommand::Sweep => {
            let removed = cache.sweep_expired().await?;
            println!("Removed {} expired entries.", removed);
        }
    }

    Ok(())
}
