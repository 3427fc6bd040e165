//! Task lifecycle state machine.
//!
//! ```text
//! Pending ──Dispatched──► Syncing ──Succeeded──► Completed (deleted)
//!    ▲                       │
//!    └──retry available──────┤
//!                            └──budget spent / terminal──► Failed (kept)
//! ```
//!
//! [`on_event`] applies an event to a task record and returns the actions
//! the caller must carry out (persist, delete, arm a retry timer, publish an
//! event). Nothing here touches the network, the store or a clock other than
//! stamping `updated_at`.

use std::time::Duration;
use sync_types::{SyncTask, TaskError, TaskId, TaskStatus};

use crate::BackoffPolicy;

/// Inputs to the task state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// The engine took ownership of the task and is about to process it.
    Dispatched,
    /// The kind-specific processor finished successfully.
    Succeeded,
    /// The attempt failed.
    AttemptFailed {
        /// What went wrong, and whether it is transient.
        error: TaskError,
    },
    /// The task was found in `Syncing` with no live owner (crash recovery).
    Recovered,
}

/// Instructions for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskAction {
    /// Write the task record back to the store.
    Persist,
    /// Remove the task record from the store.
    Delete,
    /// Arm a retry timer.
    ScheduleRetry {
        /// How long to wait before re-dispatching.
        delay: Duration,
    },
    /// Publish a lifecycle event.
    Emit(SyncEvent),
}

/// Lifecycle events published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Processing progress.
    Progress {
        /// The task.
        task_id: TaskId,
        /// Completion percentage (0..=100).
        percent: u8,
    },
    /// An attempt failed and a retry is scheduled.
    Retry {
        /// The task.
        task_id: TaskId,
        /// Failed attempts so far.
        retry_count: u32,
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// The task finished and was removed from the store.
    Completed {
        /// The task.
        task_id: TaskId,
    },
    /// The task failed terminally and stays in the store.
    Failed {
        /// The task.
        task_id: TaskId,
        /// Terminal error.
        error: String,
    },
    /// The task was cancelled or dismissed.
    Cancelled {
        /// The task.
        task_id: TaskId,
    },
    /// The task is waiting for connectivity.
    Deferred {
        /// The task.
        task_id: TaskId,
    },
    /// A data record push was accepted by the server.
    RecordPushed {
        /// The task.
        task_id: TaskId,
        /// The record.
        record_id: String,
        /// Server-assigned version, the new local version of the record.
        version: u64,
    },
}

impl SyncEvent {
    /// The task this event is about.
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Progress { task_id, .. }
            | Self::Retry { task_id, .. }
            | Self::Completed { task_id }
            | Self::Failed { task_id, .. }
            | Self::Cancelled { task_id }
            | Self::Deferred { task_id }
            | Self::RecordPushed { task_id, .. } => *task_id,
        }
    }

    /// True for `Completed`, `Failed` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

/// How failed attempts are turned into retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    /// Delay computation.
    pub backoff: BackoffPolicy,
    /// Retry errors classified as terminal too, instead of failing fast.
    pub retry_terminal_errors: bool,
}

/// Apply an event to a task and return the actions to execute.
///
/// Events that do not apply to the task's current status leave it unchanged
/// and yield no actions.
pub fn on_event(task: &mut SyncTask, event: TaskEvent, policy: &RetryPolicy) -> Vec<TaskAction> {
    match (task.status, event) {
        // Syncing here means a stale record; the engine's in-flight guard
        // rules out a live owner before dispatching.
        (TaskStatus::Pending | TaskStatus::Syncing | TaskStatus::Failed, TaskEvent::Dispatched) => {
            if task.status == TaskStatus::Failed && !task.is_dispatchable() {
                return vec![];
            }
            task.status = TaskStatus::Syncing;
            task.touch();
            vec![
                TaskAction::Persist,
                TaskAction::Emit(SyncEvent::Progress {
                    task_id: task.id,
                    percent: 0,
                }),
            ]
        }

        (TaskStatus::Syncing, TaskEvent::Succeeded) => {
            task.status = TaskStatus::Completed;
            task.last_error = None;
            task.touch();
            vec![
                TaskAction::Delete,
                TaskAction::Emit(SyncEvent::Completed { task_id: task.id }),
            ]
        }

        (TaskStatus::Syncing, TaskEvent::AttemptFailed { error }) => {
            let attempt = task.retry_count;
            task.retry_count = task.retry_count.saturating_add(1);
            task.touch();

            let retryable = error.retryable || policy.retry_terminal_errors;
            if retryable && task.is_under_ceiling() {
                let delay = policy.backoff.next_delay(attempt);
                task.status = TaskStatus::Pending;
                task.last_error = Some(error);
                vec![
                    TaskAction::Persist,
                    TaskAction::ScheduleRetry { delay },
                    TaskAction::Emit(SyncEvent::Retry {
                        task_id: task.id,
                        retry_count: task.retry_count,
                        delay,
                    }),
                ]
            } else {
                let message = error.message.clone();
                task.status = TaskStatus::Failed;
                task.last_error = Some(error);
                vec![
                    TaskAction::Persist,
                    TaskAction::Emit(SyncEvent::Failed {
                        task_id: task.id,
                        error: message,
                    }),
                ]
            }
        }

        (TaskStatus::Syncing, TaskEvent::Recovered) => {
            task.status = TaskStatus::Pending;
            task.touch();
            vec![TaskAction::Persist]
        }

        // Invalid transitions - stay in current state
        _ => vec![],
    }
}
