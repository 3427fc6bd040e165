//! # sync-store
//!
//! Durable storage for the backsync task queue.
//!
//! The engine persists every task mutation through [`TaskStore`] before
//! acting on it, so a process restart loses nothing that was accepted.
//! Two backends are provided:
//! - [`MemoryTaskStore`] for tests and ephemeral use
//! - [`SqliteTaskStore`] for on-disk persistence (WAL mode)

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod memory;
mod sqlite;

pub use error::StoreError;
pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;

use async_trait::async_trait;
use sync_types::{SyncTask, TaskId};

/// Trait for task queue backends.
///
/// `save` is an upsert keyed by task id. Implementations must be safe to
/// share across tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert or replace a task record.
    async fn save(&self, task: &SyncTask) -> Result<(), StoreError>;

    /// Load one task.
    async fn load(&self, id: &TaskId) -> Result<Option<SyncTask>, StoreError>;

    /// Load every task, highest priority first, then oldest first.
    async fn load_all(&self) -> Result<Vec<SyncTask>, StoreError>;

    /// Remove a task. Returns `true` if it existed.
    async fn delete(&self, id: &TaskId) -> Result<bool, StoreError>;
}

/// Sort tasks into dispatch order: priority descending, then creation time.
pub fn dispatch_order(tasks: &mut [SyncTask]) {
    tasks.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
    });
}
