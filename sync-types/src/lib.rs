//! # sync-types
//!
//! Data model for the backsync background synchronization engine.
//!
//! This crate provides the foundational types used across all backsync crates:
//! - [`TaskId`] - Durable task identity
//! - [`SyncTask`] - The unit of work, with its [`TaskStatus`] and [`Priority`]
//! - [`TaskPayload`] - Closed sum type over the three task kinds
//! - [`Chunk`], [`FileDescriptor`], [`FileUploadPayload`] - Resumable uploads
//! - [`DataRecordPayload`], [`RemoteRecord`], [`ConflictRecord`] - Record sync and merge
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod payload;
mod task;

pub use error::TypesError;
pub use ids::TaskId;
pub use payload::{
    Chunk, ConflictRecord, DataRecordPayload, FieldValue, FileDescriptor, FileUploadPayload,
    PreferencesPayload, RecordBody, RemoteRecord, TaskPayload,
};
pub use task::{now_millis, Priority, SyncTask, TaskError, TaskKind, TaskStatus};
