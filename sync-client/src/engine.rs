//! SyncEngine - the background sync scheduler.
//!
//! # Architecture
//!
//! The engine owns the in-progress set, the retry timers and the event bus.
//! Status transitions come from the pure state machine in sync-core; the
//! engine interprets the returned actions against the store, the timers and
//! the bus.
//!
//! ```text
//! Application → SyncEngine → Transport → Network
//!                   ↓    ↘
//!     sync-core (state)   TaskStore (source of truth)
//! ```
//!
//! Every task runs as its own tokio task. The only mutual exclusion is per
//! task id: a second dispatch of a task already in flight is a no-op.
//! Every write to a task record is a read-modify-write against the store
//! under one async lock, so a concurrent `cancel` is never undone by a late
//! checkpoint.
//!
//! The engine must be used from within a tokio runtime.
//!
//! # Example
//!
//! ```ignore
//! let engine = SyncEngine::new(transport, store, EngineConfig::default())?;
//! let mut events = engine.subscribe();
//! engine.resume().await?;
//! let id = engine.enqueue(payload, Priority::High).await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sync_core::chunker::{acknowledge, pending_chunks};
use sync_core::{
    has_conflict, on_event, resolve, Chunker, RetryPolicy, SourceFile, SyncEvent, TaskAction,
    TaskEvent,
};
use sync_store::TaskStore;
use sync_types::{
    DataRecordPayload, FileUploadPayload, PreferencesPayload, Priority, SyncTask, TaskId,
    TaskPayload, TaskStatus,
};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::connectivity::{DeferredExecution, ReconnectListener};
use crate::error::EngineError;
use crate::events::EventBus;
use crate::transport::Transport;

/// Result of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The task finished and was removed from the store.
    Completed,
    /// The attempt failed; a retry is scheduled after the delay.
    Retry(Duration),
    /// The task failed terminally and stays in the store.
    Failed,
    /// The engine is offline; the task waits for connectivity.
    Deferred,
    /// Another dispatch of the same task is in flight.
    AlreadyInFlight,
    /// The task does not exist (never enqueued, completed or cancelled).
    Missing,
    /// The task exists but is not eligible (e.g. exhausted `Failed`).
    Skipped,
}

/// Background sync engine.
///
/// Cheap to clone; clones drive the same engine.
pub struct SyncEngine<T: Transport, S: TaskStore + 'static> {
    inner: Arc<Inner<T, S>>,
}

struct Inner<T, S> {
    transport: T,
    store: S,
    config: EngineConfig,
    policy: RetryPolicy,
    chunker: Chunker,
    events: EventBus,
    online: AtomicBool,
    in_progress: Mutex<HashSet<TaskId>>,
    timers: Mutex<HashMap<TaskId, JoinHandle<()>>>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
    store_lock: tokio::sync::Mutex<()>,
    deferral: Arc<dyn DeferredExecution>,
}

impl<T: Transport, S: TaskStore + 'static> Clone for SyncEngine<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Lock a std mutex, recovering from poisoning. Critical sections here only
/// insert into or remove from collections.
fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A state transition that took effect.
struct Applied {
    task: SyncTask,
    retry_delay: Option<Duration>,
}

/// Removes the task id from the in-progress set when dropped.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<TaskId>>,
    id: TaskId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.id);
    }
}

impl<T: Transport, S: TaskStore + 'static> SyncEngine<T, S> {
    /// Create an engine with the default reconnect-listener deferral.
    pub fn new(transport: T, store: S, config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_deferral(transport, store, config, Arc::new(ReconnectListener::new()))
    }

    /// Create an engine with a custom deferred-execution hook.
    pub fn with_deferral(
        transport: T,
        store: S,
        config: EngineConfig,
        deferral: Arc<dyn DeferredExecution>,
    ) -> Result<Self, EngineError> {
        let chunker = Chunker::new(config.chunk_size)?;
        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                store,
                policy: config.retry_policy(),
                chunker,
                events: EventBus::new(config.event_capacity),
                online: AtomicBool::new(config.start_online),
                in_progress: Mutex::new(HashSet::new()),
                timers: Mutex::new(HashMap::new()),
                watchers: Mutex::new(Vec::new()),
                store_lock: tokio::sync::Mutex::new(()),
                deferral,
                config,
            }),
        })
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// The task store.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Current connectivity as seen by the engine.
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// True if the task is currently being processed by this engine.
    pub fn is_in_flight(&self, id: &TaskId) -> bool {
        lock(&self.inner.in_progress).contains(id)
    }

    /// True if a retry timer is armed for the task.
    pub fn has_pending_retry(&self, id: &TaskId) -> bool {
        lock(&self.inner.timers)
            .get(id)
            .is_some_and(|handle| !handle.is_finished())
    }

    // =========================================================================
    // Public operations
    // =========================================================================

    /// Accept a task.
    ///
    /// The task is validated, persisted as `Pending` and then dispatched if
    /// online, or deferred until connectivity returns. Only malformed input
    /// and store failures are reported here; processing failures surface as
    /// events.
    pub async fn enqueue(
        &self,
        payload: TaskPayload,
        priority: Priority,
    ) -> Result<TaskId, EngineError> {
        payload.validate()?;
        let max_retries = self.inner.config.retry_limits.for_kind(payload.kind());
        let task = SyncTask::new(payload, priority, max_retries);
        let id = task.id;

        {
            let _write = self.inner.store_lock.lock().await;
            self.inner.store.save(&task).await?;
        }
        tracing::info!(
            "Enqueued {} task {} (priority {}, max retries {})",
            task.kind(),
            id,
            priority,
            max_retries
        );

        if self.is_online() {
            self.dispatch(id);
        } else {
            self.defer(id);
        }
        Ok(id)
    }

    /// Chunk files and enqueue them as one upload task.
    pub async fn enqueue_upload(
        &self,
        files: &[SourceFile],
        priority: Priority,
    ) -> Result<TaskId, EngineError> {
        let payload = self.inner.chunker.prepare(files)?;
        tracing::debug!(
            "Prepared upload of {} file(s) in {} chunk(s)",
            payload.files.len(),
            payload.total_chunks()
        );
        self.enqueue(TaskPayload::FileUpload(payload), priority).await
    }

    /// Remove a task and its pending retry.
    ///
    /// An in-flight transport call is not aborted; its result is discarded.
    /// Returns `true` if the task existed.
    pub async fn cancel(&self, id: TaskId) -> Result<bool, EngineError> {
        self.abort_timer(&id);
        self.inner.deferral.unregister(id);

        let existed = {
            let _write = self.inner.store_lock.lock().await;
            self.inner.store.delete(&id).await?
        };

        if existed {
            tracing::info!("Cancelled task {}", id);
            self.inner.events.publish(SyncEvent::Cancelled { task_id: id });
        }
        Ok(existed)
    }

    /// Clear a `Failed` task after inspection.
    ///
    /// Returns `Ok(false)` if the task does not exist.
    pub async fn dismiss(&self, id: TaskId) -> Result<bool, EngineError> {
        match self.inner.store.load(&id).await? {
            None => Ok(false),
            Some(task) if task.status == TaskStatus::Failed => self.cancel(id).await,
            Some(task) => Err(EngineError::Validation(format!(
                "task {} is {}, only failed tasks can be dismissed",
                id, task.status
            ))),
        }
    }

    /// All stored tasks, highest priority first.
    pub async fn tasks(&self) -> Result<Vec<SyncTask>, EngineError> {
        Ok(self.inner.store.load_all().await?)
    }

    /// One stored task.
    pub async fn task(&self, id: TaskId) -> Result<Option<SyncTask>, EngineError> {
        Ok(self.inner.store.load(&id).await?)
    }

    /// React to a connectivity change.
    ///
    /// Going online re-dispatches every eligible task in priority order and
    /// returns their ids. Going offline disarms retry timers; in-flight calls
    /// are left to fail on their own, and the next online transition resumes
    /// from the last checkpoint.
    pub async fn on_connectivity_change(&self, online: bool) -> Result<Vec<TaskId>, EngineError> {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);

        if !online {
            if was_online {
                tracing::info!("Connectivity lost");
            }
            let aborted = self.abort_all_timers();
            if aborted > 0 {
                tracing::debug!("Disarmed {} retry timer(s)", aborted);
            }
            return Ok(Vec::new());
        }

        if !was_online {
            tracing::info!("Connectivity restored");
        }
        self.dispatch_eligible().await
    }

    /// Recover after a process start.
    ///
    /// Tasks left in `Syncing` by a crash go back to `Pending`. Eligible
    /// tasks are then dispatched (online) or deferred (offline). Returns the
    /// ids of the tasks picked up.
    pub async fn resume(&self) -> Result<Vec<TaskId>, EngineError> {
        let tasks = self.inner.store.load_all().await?;
        let mut recovered = 0;

        for task in tasks.iter().filter(|t| t.status == TaskStatus::Syncing) {
            if self.is_in_flight(&task.id) {
                continue;
            }
            match self.apply(task.id, TaskEvent::Recovered).await {
                Ok(Some(_)) => recovered += 1,
                Ok(None) => {}
                Err(EngineError::Cancelled(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if recovered > 0 {
            tracing::info!("Recovered {} interrupted task(s)", recovered);
        }

        if self.is_online() {
            self.dispatch_eligible().await
        } else {
            let waiting: Vec<TaskId> = self
                .inner
                .store
                .load_all()
                .await?
                .into_iter()
                .filter(SyncTask::is_dispatchable)
                .map(|t| t.id)
                .collect();
            for id in &waiting {
                self.defer(*id);
            }
            Ok(waiting)
        }
    }

    /// Start processing a task in the background.
    ///
    /// Supersedes a scheduled retry. If the task is already in flight the
    /// spawned attempt resolves to [`DispatchOutcome::AlreadyInFlight`].
    pub fn dispatch(&self, id: TaskId) -> JoinHandle<DispatchOutcome> {
        self.abort_timer(&id);
        let engine = self.clone();
        tokio::spawn(async move { engine.run_logged(id).await })
    }

    /// Follow a connectivity signal until the sender is dropped or the
    /// engine shuts down. The current value is applied immediately.
    pub fn attach_connectivity(&self, mut rx: watch::Receiver<bool>) {
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            let mut online = *rx.borrow_and_update();
            loop {
                if let Err(e) = engine.on_connectivity_change(online).await {
                    tracing::error!("Failed to apply connectivity change: {}", e);
                }
                if rx.changed().await.is_err() {
                    break;
                }
                online = *rx.borrow_and_update();
            }
        });

        let mut watchers = lock(&self.inner.watchers);
        watchers.retain(|h| !h.is_finished());
        watchers.push(handle);
    }

    /// Stop background activity: retry timers and connectivity watchers.
    ///
    /// Attempts already running are left to finish; tasks stay in the store
    /// and are picked up again by `resume`.
    pub fn shutdown(&self) {
        let timers = self.abort_all_timers();
        let mut watchers = lock(&self.inner.watchers);
        for handle in watchers.drain(..) {
            handle.abort();
        }
        tracing::info!("Engine stopped ({} retry timer(s) disarmed)", timers);
    }

    /// Run one attempt of a task inline.
    ///
    /// Store failures are returned; every processing failure is converted
    /// into a retry or a terminal failure and reported through the outcome.
    pub async fn run_task(&self, id: TaskId) -> Result<DispatchOutcome, EngineError> {
        let Some(_guard) = self.claim(id) else {
            tracing::debug!("Task {} already in flight, skipping dispatch", id);
            return Ok(DispatchOutcome::AlreadyInFlight);
        };

        let Some(task) = self.inner.store.load(&id).await? else {
            return Ok(DispatchOutcome::Missing);
        };
        if !task.is_dispatchable() {
            return Ok(DispatchOutcome::Skipped);
        }
        if !self.is_online() {
            self.defer(id);
            return Ok(DispatchOutcome::Deferred);
        }

        let task = match self.apply(id, TaskEvent::Dispatched).await {
            Ok(Some(applied)) => applied.task,
            Ok(_) => return Ok(DispatchOutcome::Skipped),
            Err(EngineError::Cancelled(_)) => return Ok(DispatchOutcome::Missing),
            Err(e) => return Err(e),
        };
        self.inner.deferral.unregister(id);
        tracing::info!(
            "Dispatching {} task {} (attempt {}/{})",
            task.kind(),
            id,
            task.retry_count + 1,
            task.max_retries
        );

        let result = match task.payload {
            TaskPayload::FileUpload(upload) => self.process_upload(id, upload).await,
            TaskPayload::DataRecord(record) => self.process_record(id, record).await,
            TaskPayload::Preferences(prefs) => self.process_preferences(id, prefs).await,
        };

        match result {
            Ok(()) => self.finish(id).await,
            Err(EngineError::Cancelled(_)) => {
                tracing::info!("Task {} was cancelled mid-flight", id);
                Ok(DispatchOutcome::Missing)
            }
            Err(e) => self.fail(id, e).await,
        }
    }

    // =========================================================================
    // Kind-specific processors
    // =========================================================================

    /// Upload unacknowledged chunks in index order, checkpointing each one,
    /// then finalize once.
    async fn process_upload(
        &self,
        id: TaskId,
        upload: FileUploadPayload,
    ) -> Result<(), EngineError> {
        let total = upload.total_chunks();
        let pending: Vec<u32> = pending_chunks(&upload).map(|c| c.index).collect();
        if pending.len() < total {
            tracing::info!(
                "Resuming upload {} at chunk {} ({}/{} already acknowledged)",
                id,
                pending.first().copied().unwrap_or(total as u32),
                total - pending.len(),
                total
            );
        }

        for index in pending {
            let chunk = &upload.chunks[index as usize];
            self.inner.transport.upload_chunk(chunk, &id).await?;

            let percent = self.checkpoint_chunk(id, index).await?;
            tracing::debug!("Task {} chunk {}/{} acknowledged", id, index + 1, total);
            self.inner.events.publish(SyncEvent::Progress {
                task_id: id,
                percent,
            });
        }

        if self.inner.store.load(&id).await?.is_none() {
            return Err(EngineError::Cancelled(id));
        }
        self.inner
            .transport
            .finalize_upload(&id, &upload.files)
            .await?;
        tracing::debug!("Task {} finalized ({} file(s))", id, upload.files.len());
        Ok(())
    }

    /// Fetch, merge if the server moved ahead, push.
    async fn process_record(
        &self,
        id: TaskId,
        local: DataRecordPayload,
    ) -> Result<(), EngineError> {
        let remote = self
            .inner
            .transport
            .fetch_record(&local.record_id)
            .await
            .map_err(EngineError::Conflict)?;

        let outgoing = match remote {
            Some(remote) if has_conflict(&local, &remote) => {
                let merged = resolve(&local, &remote);
                tracing::info!(
                    "Record {} changed remotely (local v{}, remote v{}); merged {} field(s)",
                    local.record_id,
                    merged.local_version,
                    merged.remote_version,
                    merged.detected_fields.len()
                );
                DataRecordPayload {
                    record_id: local.record_id.clone(),
                    local_version: merged.remote_version,
                    body: merged.merged_body,
                    client_timestamp: local.client_timestamp,
                }
            }
            _ => local,
        };

        if self.inner.store.load(&id).await?.is_none() {
            return Err(EngineError::Cancelled(id));
        }
        let version = self.inner.transport.push_record(&outgoing).await?;
        tracing::debug!("Record {} accepted at version {}", outgoing.record_id, version);
        self.inner.events.publish(SyncEvent::RecordPushed {
            task_id: id,
            record_id: outgoing.record_id,
            version,
        });
        Ok(())
    }

    async fn process_preferences(
        &self,
        id: TaskId,
        prefs: PreferencesPayload,
    ) -> Result<(), EngineError> {
        self.inner.transport.push_preferences(&prefs).await?;
        tracing::debug!("Task {} pushed {} preference(s)", id, prefs.values.len());
        Ok(())
    }

    // =========================================================================
    // Outcomes
    // =========================================================================

    async fn finish(&self, id: TaskId) -> Result<DispatchOutcome, EngineError> {
        match self.apply(id, TaskEvent::Succeeded).await {
            Ok(_) => {
                tracing::info!("Task {} completed", id);
                Ok(DispatchOutcome::Completed)
            }
            Err(EngineError::Cancelled(_)) => Ok(DispatchOutcome::Missing),
            Err(e) => Err(e),
        }
    }

    async fn fail(&self, id: TaskId, error: EngineError) -> Result<DispatchOutcome, EngineError> {
        let applied = match self
            .apply(
                id,
                TaskEvent::AttemptFailed {
                    error: error.to_task_error(),
                },
            )
            .await
        {
            Ok(Some(applied)) => applied,
            Ok(None) => return Ok(DispatchOutcome::Skipped),
            Err(EngineError::Cancelled(_)) => return Ok(DispatchOutcome::Missing),
            Err(e) => return Err(e),
        };
        let task = applied.task;

        let Some(delay) = applied.retry_delay else {
            tracing::error!(
                "Task {} failed after {} attempt(s): {}",
                id,
                task.retry_count,
                error
            );
            return Ok(DispatchOutcome::Failed);
        };

        if !self.is_online() {
            // No timer while offline; the next online transition redispatches.
            tracing::info!(
                "Task {} attempt {}/{} failed while offline: {}",
                id,
                task.retry_count,
                task.max_retries,
                error
            );
            self.defer(id);
            return Ok(DispatchOutcome::Deferred);
        }

        tracing::warn!(
            "Task {} attempt {}/{} failed: {}; retrying in {:?}",
            id,
            task.retry_count,
            task.max_retries,
            error,
            delay
        );
        Ok(DispatchOutcome::Retry(delay))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn run_logged(&self, id: TaskId) -> DispatchOutcome {
        match self.run_task(id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Dispatch of task {} aborted: {}", id, e);
                DispatchOutcome::Skipped
            }
        }
    }

    fn claim(&self, id: TaskId) -> Option<InFlightGuard<'_>> {
        let mut set = lock(&self.inner.in_progress);
        if !set.insert(id) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.inner.in_progress,
            id,
        })
    }

    /// Apply a state machine event to the stored task and carry out the
    /// resulting actions.
    ///
    /// Returns `None` if the event did not apply. A missing task is reported
    /// as `Cancelled`.
    async fn apply(&self, id: TaskId, event: TaskEvent) -> Result<Option<Applied>, EngineError> {
        let (task, actions) = {
            let _write = self.inner.store_lock.lock().await;
            let mut task = self
                .inner
                .store
                .load(&id)
                .await?
                .ok_or(EngineError::Cancelled(id))?;

            let actions = on_event(&mut task, event, &self.inner.policy);
            for action in &actions {
                match action {
                    TaskAction::Persist => self.inner.store.save(&task).await?,
                    TaskAction::Delete => {
                        self.inner.store.delete(&id).await?;
                    }
                    TaskAction::ScheduleRetry { .. } | TaskAction::Emit(_) => {}
                }
            }
            (task, actions)
        };

        if actions.is_empty() {
            return Ok(None);
        }

        let mut retry_delay = None;
        for action in actions {
            match action {
                TaskAction::ScheduleRetry { delay } => {
                    if self.is_online() {
                        self.schedule_retry(id, delay);
                    }
                    retry_delay = Some(delay);
                }
                TaskAction::Emit(event) => self.inner.events.publish(event),
                TaskAction::Persist | TaskAction::Delete => {}
            }
        }
        Ok(Some(Applied { task, retry_delay }))
    }

    /// Add a chunk index to the persisted acknowledged set. Returns the new
    /// completion percentage.
    async fn checkpoint_chunk(&self, id: TaskId, index: u32) -> Result<u8, EngineError> {
        let _write = self.inner.store_lock.lock().await;
        let mut task = self
            .inner
            .store
            .load(&id)
            .await?
            .ok_or(EngineError::Cancelled(id))?;

        let TaskPayload::FileUpload(upload) = &mut task.payload else {
            return Err(EngineError::Validation(format!(
                "task {} is not a file upload",
                id
            )));
        };
        acknowledge(upload, index)?;
        let percent = upload.percent();

        task.touch();
        self.inner.store.save(&task).await?;
        Ok(percent)
    }

    fn schedule_retry(&self, id: TaskId, delay: Duration) {
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.forget_own_timer(&id);
            engine.run_logged(id).await;
        });

        let mut timers = lock(&self.inner.timers);
        timers.retain(|_, h| !h.is_finished());
        if let Some(previous) = timers.insert(id, handle) {
            previous.abort();
        }
    }

    /// Called from inside a firing timer: drop its own handle so a retry it
    /// schedules does not abort the running timer task.
    fn forget_own_timer(&self, id: &TaskId) {
        let current = tokio::task::id();
        let mut timers = lock(&self.inner.timers);
        if timers.get(id).is_some_and(|h| h.id() == current) {
            timers.remove(id);
        }
    }

    fn abort_timer(&self, id: &TaskId) {
        if let Some(handle) = lock(&self.inner.timers).remove(id) {
            handle.abort();
        }
    }

    fn abort_all_timers(&self) -> usize {
        let mut timers = lock(&self.inner.timers);
        let count = timers.values().filter(|h| !h.is_finished()).count();
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        count
    }

    fn defer(&self, id: TaskId) {
        self.inner.deferral.register(id);
        tracing::debug!("Task {} deferred until connectivity returns", id);
        self.inner.events.publish(SyncEvent::Deferred { task_id: id });
    }

    async fn dispatch_eligible(&self) -> Result<Vec<TaskId>, EngineError> {
        let eligible: Vec<TaskId> = self
            .inner
            .store
            .load_all()
            .await?
            .into_iter()
            .filter(|t| t.is_dispatchable() && !self.is_in_flight(&t.id))
            .map(|t| t.id)
            .collect();

        if !eligible.is_empty() {
            tracing::info!("Dispatching {} pending task(s)", eligible.len());
        }
        for id in &eligible {
            self.dispatch(*id);
        }
        Ok(eligible)
    }
}
