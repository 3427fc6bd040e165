//! CLI command implementations.

use anyhow::{Context, Result};
use std::path::Path;
use sync_client::{HttpTransport, SyncEngine};
use sync_store::SqliteTaskStore;

use crate::config::Config;

pub mod enqueue;
pub mod queue;
pub mod run;

/// The engine the CLI drives.
pub type Engine = SyncEngine<HttpTransport, SqliteTaskStore>;

/// Open the queue database and build an engine around it.
///
/// With `online == false` the engine only persists work; nothing is sent.
pub async fn open_engine(config: &Config, data_dir: &Path, online: bool) -> Result<Engine> {
    let database = config.database_path(data_dir);
    let store = SqliteTaskStore::new(&database)
        .await
        .with_context(|| format!("Failed to open queue at {}", database.display()))?;
    let transport = HttpTransport::new(&config.remote.base_url, config.timeout())
        .context("Failed to create HTTP transport")?;

    let engine_config = config.engine_config().with_start_online(online);
    SyncEngine::new(transport, store, engine_config).context("Invalid engine configuration")
}
