//! Transport abstraction for backsync.
//!
//! The engine talks to the server only through [`Transport`]:
//! - `upload_chunk()` sends one chunk of a file upload
//! - `finalize_upload()` tells the server every chunk has arrived
//! - `fetch_record()` / `push_record()` read and write data records
//! - `push_preferences()` overwrites the device's preferences
//!
//! Every failure carries an [`ErrorClass`] so the engine can stop retrying
//! requests the server will never accept.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.fail_chunk(1, 2, TransportError::Timeout);
//! let engine = SyncEngine::new(transport.clone(), store, EngineConfig::default());
//! ```

mod http;
mod mock;

pub use http::HttpTransport;
pub use mock::MockTransport;

use async_trait::async_trait;
use sync_types::{
    Chunk, DataRecordPayload, FileDescriptor, PreferencesPayload, RemoteRecord, TaskId,
};
use thiserror::Error;

/// Whether a failed request is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient: network trouble, overload, server error.
    Retryable,
    /// Permanent: the server rejected the request itself.
    Terminal,
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timed out.
    #[error("request timeout")]
    Timeout,

    /// Server answered with a transient error status.
    #[error("server error {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// Server refused the request.
    #[error("rejected with {status}: {reason}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Server-provided reason.
        reason: String,
    },

    /// Response could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The device is offline.
    #[error("offline")]
    Offline,
}

const MAX_BODY_IN_ERROR: usize = 512;

impl TransportError {
    /// Build an error from a non-success HTTP status.
    ///
    /// 408, 425, 429 and 5xx are transient. Every other status means the
    /// server refused the request as sent.
    pub fn from_status(status: u16, body: &str) -> Self {
        let body: String = body.chars().take(MAX_BODY_IN_ERROR).collect();
        if is_retryable_status(status) {
            Self::Status { status, body }
        } else {
            Self::Rejected {
                status,
                reason: body,
            }
        }
    }

    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ConnectionFailed(_) | Self::Timeout | Self::Offline => ErrorClass::Retryable,
            Self::Status { status, .. } if is_retryable_status(*status) => ErrorClass::Retryable,
            Self::Status { .. } | Self::Rejected { .. } | Self::InvalidResponse(_) => {
                ErrorClass::Terminal
            }
        }
    }

    /// Shorthand for `class() == ErrorClass::Retryable`.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 425 | 429) || (500..600).contains(&status)
}

/// Transport trait for the sync server.
///
/// Implementations handle the underlying mechanism (HTTP, mock, ...).
/// Calls must be idempotent per chunk index and per task: the engine may
/// repeat a call whose response was lost.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Upload one chunk of a file upload task.
    async fn upload_chunk(&self, chunk: &Chunk, task_id: &TaskId) -> Result<(), TransportError>;

    /// Signal that all chunks of a task were uploaded.
    async fn finalize_upload(
        &self,
        task_id: &TaskId,
        files: &[FileDescriptor],
    ) -> Result<(), TransportError>;

    /// Push a data record. Returns the server-assigned version.
    async fn push_record(&self, record: &DataRecordPayload) -> Result<u64, TransportError>;

    /// Fetch the server's copy of a record, if any.
    async fn fetch_record(&self, record_id: &str) -> Result<Option<RemoteRecord>, TransportError>;

    /// Push a device's preferences (overwrite).
    async fn push_preferences(&self, prefs: &PreferencesPayload) -> Result<(), TransportError>;
}
