//! # backsync
//!
//! Operator CLI for the backsync background sync queue.
//!
//! ## Commands
//!
//! - `upload`: Queue files for chunked upload
//! - `record`: Queue a data record push
//! - `prefs`: Queue a preferences push
//! - `list`: Show queued tasks
//! - `cancel` / `dismiss`: Remove a task
//! - `run`: Process the queue against the configured remote
//!
//! ## Example
//!
//! ```bash
//! # Queue work (no network needed)
//! backsync upload --priority high scan-01.tiff scan-02.tiff
//! backsync record study-17 '{"title": "Revised", "tags": ["mri"]}' --base-version 4
//! backsync prefs --device laptop theme=dark locale=en-GB
//!
//! # Drain the queue
//! backsync run
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use sync_types::{Priority, TaskId};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{enqueue, queue, run};
use config::Config;

/// Operator CLI for the backsync background sync queue.
#[derive(Parser, Debug)]
#[command(name = "backsync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory holding the queue database and backsync.toml
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (default: <data-dir>/backsync.toml if present)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue files for chunked upload (one task for all files)
    Upload {
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Task priority (low, medium, high)
        #[arg(long, short, default_value = "medium")]
        priority: Priority,
    },

    /// Queue a data record push
    Record {
        /// Record identifier
        record_id: String,

        /// Record body as a JSON object
        body: String,

        /// Server version this edit was based on
        #[arg(long, default_value = "0")]
        base_version: u64,

        /// Task priority (low, medium, high)
        #[arg(long, short, default_value = "medium")]
        priority: Priority,
    },

    /// Queue a preferences push
    Prefs {
        /// Device the preferences belong to
        #[arg(long, short)]
        device: String,

        /// key=value pairs; values are parsed as JSON, falling back to strings
        #[arg(required = true)]
        values: Vec<String>,

        /// Task priority (low, medium, high)
        #[arg(long, short, default_value = "low")]
        priority: Priority,
    },

    /// Show queued tasks
    List,

    /// Remove a task and its pending retry
    Cancel {
        /// Task id
        task_id: TaskId,
    },

    /// Clear a failed task
    Dismiss {
        /// Task id
        task_id: TaskId,
    },

    /// Process the queue against the configured remote
    Run {
        /// Keep running after the queue drains (stop with Ctrl-C)
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;

    let config = Config::resolve(cli.config.as_deref(), &data_dir)?;

    // Only `run` talks to the remote; everything else works on the queue.
    let online = matches!(cli.command, Commands::Run { .. });
    let engine = commands::open_engine(&config, &data_dir, online).await?;

    match cli.command {
        Commands::Upload { files, priority } => {
            enqueue::upload(&engine, &files, priority).await?;
        }
        Commands::Record {
            record_id,
            body,
            base_version,
            priority,
        } => {
            enqueue::record(&engine, &record_id, &body, base_version, priority).await?;
        }
        Commands::Prefs {
            device,
            values,
            priority,
        } => {
            enqueue::preferences(&engine, &device, &values, priority).await?;
        }
        Commands::List => {
            queue::list(&engine).await?;
        }
        Commands::Cancel { task_id } => {
            queue::cancel(&engine, task_id).await?;
        }
        Commands::Dismiss { task_id } => {
            queue::dismiss(&engine, task_id).await?;
        }
        Commands::Run { watch } => {
            run::run(&engine, watch).await?;
        }
    }

    engine.shutdown();
    engine.store().close().await;
    Ok(())
}

/// Install the log subscriber. `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Get the default data directory for backsync.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("org", "backsync", "backsync")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
