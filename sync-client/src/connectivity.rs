//! Connectivity signal and deferred-execution registration.
//!
//! The engine learns about connectivity from a `watch` channel (see
//! [`ConnectivitySignal`]) or from direct `on_connectivity_change` calls.
//! When work cannot run because the device is offline, the engine registers
//! a "run me when online" intent through [`DeferredExecution`]. Hosts with a
//! platform background-sync facility can forward that intent; everyone else
//! uses [`ReconnectListener`], which just remembers the ids.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use sync_types::TaskId;
use tokio::sync::watch;

/// Hook for "notify me when connectivity returns".
pub trait DeferredExecution: Send + Sync + 'static {
    /// Register a task that is waiting for connectivity.
    fn register(&self, task_id: TaskId);

    /// Forget a registration (task cancelled or completed).
    fn unregister(&self, task_id: TaskId);
}

/// Default deferral: an in-process set of waiting task ids.
#[derive(Debug, Clone, Default)]
pub struct ReconnectListener {
    waiting: Arc<Mutex<BTreeSet<TaskId>>>,
}

impl ReconnectListener {
    /// Create an empty listener.
    pub fn new() -> Self {
        Self::default()
    }

    /// Task ids currently waiting for connectivity.
    pub fn waiting(&self) -> Vec<TaskId> {
        self.with_waiting(|w| w.iter().copied().collect())
    }

    /// Remove and return every waiting id.
    pub fn take_waiting(&self) -> Vec<TaskId> {
        self.with_waiting(|w| std::mem::take(w).into_iter().collect())
    }

    fn with_waiting<R>(&self, f: impl FnOnce(&mut BTreeSet<TaskId>) -> R) -> R {
        let mut guard = match self.waiting.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl DeferredExecution for ReconnectListener {
    fn register(&self, task_id: TaskId) {
        self.with_waiting(|w| {
            w.insert(task_id);
        });
    }

    fn unregister(&self, task_id: TaskId) {
        self.with_waiting(|w| {
            w.remove(&task_id);
        });
    }
}

/// Sender side of a connectivity signal.
#[derive(Debug, Clone)]
pub struct ConnectivitySignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivitySignal {
    /// Create a signal with an initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Report the current connectivity. Unchanged values are not re-sent.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    /// Current state.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// A receiver for `SyncEngine::attach_connectivity`.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
