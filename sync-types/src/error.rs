//! Error types for backsync data model.

use thiserror::Error;

/// Errors that can occur when encoding, decoding or validating tasks.
#[derive(Debug, Error)]
pub enum TypesError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Task identifier could not be parsed
    #[error("invalid task id: {0}")]
    InvalidTaskId(String),

    /// Unknown task kind tag
    #[error("unknown task kind: {0}")]
    UnknownKind(String),

    /// Unknown task status tag
    #[error("unknown task status: {0}")]
    UnknownStatus(String),

    /// Payload is structurally invalid
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
