//! In-memory task store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sync_types::{SyncTask, TaskId};

use crate::{dispatch_order, StoreError, TaskStore};

/// Task store backed by a `HashMap`.
///
/// Clones share the same map, which lets tests keep a handle to the store
/// after handing one to an engine, and simulate a restart by building a
/// second engine over the same store.
#[derive(Debug, Clone, Default)]
pub struct MemoryTaskStore {
    tasks: Arc<Mutex<HashMap<TaskId, SyncTask>>>,
}

impl MemoryTaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tasks.
    pub fn len(&self) -> usize {
        self.with_tasks(|tasks| tasks.len())
    }

    /// True if no tasks are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_tasks<R>(&self, f: impl FnOnce(&mut HashMap<TaskId, SyncTask>) -> R) -> R {
        // A poisoned map still holds consistent records; each write replaces
        // a whole entry.
        let mut guard = match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn save(&self, task: &SyncTask) -> Result<(), StoreError> {
        self.with_tasks(|tasks| {
            tasks.insert(task.id, task.clone());
        });
        Ok(())
    }

    async fn load(&self, id: &TaskId) -> Result<Option<SyncTask>, StoreError> {
        Ok(self.with_tasks(|tasks| tasks.get(id).cloned()))
    }

    async fn load_all(&self) -> Result<Vec<SyncTask>, StoreError> {
        let mut all: Vec<SyncTask> = self.with_tasks(|tasks| tasks.values().cloned().collect());
        dispatch_order(&mut all);
        Ok(all)
    }

    async fn delete(&self, id: &TaskId) -> Result<bool, StoreError> {
        Ok(self.with_tasks(|tasks| tasks.remove(id).is_some()))
    }
}
