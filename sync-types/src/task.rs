//! The sync task record and its bookkeeping enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{TaskId, TaskPayload, TypesError};

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Kind tag of a task, derived from its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    /// Chunked file upload.
    FileUpload,
    /// Analysis record push.
    DataRecord,
    /// Preferences push.
    Preferences,
}

impl TaskKind {
    /// Stable string tag, used as a storage column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileUpload => "FileUpload",
            Self::DataRecord => "DataRecord",
            Self::Preferences => "Preferences",
        }
    }
}

impl FromStr for TaskKind {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FileUpload" => Ok(Self::FileUpload),
            "DataRecord" => Ok(Self::DataRecord),
            "Preferences" => Ok(Self::Preferences),
            other => Err(TypesError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority. Orders work among eligible tasks; never preempts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Priority {
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Medium,
    /// User-visible work.
    High,
}

impl Priority {
    /// Numeric rank (higher runs first).
    pub fn rank(&self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }
}

impl FromStr for Priority {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(TypesError::InvalidPayload(format!(
                "unknown priority: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Persisted and waiting: fresh, offline-deferred, or awaiting a retry.
    Pending,
    /// Actively being processed.
    Syncing,
    /// Terminal success.
    Completed,
    /// Terminal failure; kept until dismissed.
    Failed,
}

impl TaskStatus {
    /// Stable string tag, used as a storage column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Syncing => "Syncing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    /// True for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for TaskStatus {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Syncing" => Ok(Self::Syncing),
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            other => Err(TypesError::UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The last error a task hit, kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Human-readable description.
    pub message: String,
    /// Whether the failure was classified as transient.
    pub retryable: bool,
}

/// The unit of sync work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTask {
    /// Durable identity.
    pub id: TaskId,
    /// Kind-specific data.
    pub payload: TaskPayload,
    /// Creation time (unix millis).
    pub created_at: u64,
    /// Last persisted mutation (unix millis).
    pub updated_at: u64,
    /// Scheduling priority.
    pub priority: Priority,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Ceiling on failed attempts before the task is marked `Failed`.
    pub max_retries: u32,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Most recent failure, if any.
    pub last_error: Option<TaskError>,
}

impl SyncTask {
    /// Create a new `Pending` task with a fresh id.
    pub fn new(payload: TaskPayload, priority: Priority, max_retries: u32) -> Self {
        let now = now_millis();
        Self {
            id: TaskId::new(),
            payload,
            created_at: now,
            updated_at: now,
            priority,
            retry_count: 0,
            max_retries,
            status: TaskStatus::Pending,
            last_error: None,
        }
    }

    /// The kind of this task.
    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }

    /// True while another failed attempt would still be retried.
    pub fn is_under_ceiling(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Whether the engine should pick this task up on reconnect or resume.
    ///
    /// `Pending` tasks always qualify. `Failed` tasks qualify only when their
    /// last error was transient and the retry budget is not spent. A stale
    /// `Syncing` record (left by a crash) qualifies as well; the engine's
    /// in-progress guard filters out tasks that are genuinely in flight.
    pub fn is_dispatchable(&self) -> bool {
        match self.status {
            TaskStatus::Pending | TaskStatus::Syncing => true,
            TaskStatus::Failed => {
                self.is_under_ceiling()
                    && self.last_error.as_ref().is_some_and(|e| e.retryable)
            }
            TaskStatus::Completed => false,
        }
    }

    /// Refresh `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = now_millis();
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        rmp_serde::to_vec_named(self).map_err(TypesError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        rmp_serde::from_slice(bytes).map_err(TypesError::Deserialization)
    }
}
