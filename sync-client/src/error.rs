//! Engine errors.

use sync_core::ChunkError;
use sync_store::StoreError;
use sync_types::{TaskError, TaskId, TypesError};
use thiserror::Error;

use crate::transport::TransportError;

/// Engine errors.
///
/// Only `Validation` and `Store` reach callers of `enqueue`; everything else
/// is caught at the dispatch boundary and turned into a retry or a `failed`
/// event.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed payload.
    #[error("validation error: {0}")]
    Validation(String),

    /// Fetching the remote record for a merge failed.
    #[error("conflict fetch failed: {0}")]
    Conflict(TransportError),

    /// The task was removed while in flight.
    #[error("task {0} was cancelled")]
    Cancelled(TaskId),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) | Self::Conflict(e) => e.is_retryable(),
            Self::Store(_) => true,
            Self::Validation(_) | Self::Cancelled(_) => false,
        }
    }

    /// Snapshot for the task record.
    pub fn to_task_error(&self) -> TaskError {
        TaskError {
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

impl From<TypesError> for EngineError {
    fn from(err: TypesError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<ChunkError> for EngineError {
    fn from(err: ChunkError) -> Self {
        Self::Validation(err.to_string())
    }
}
