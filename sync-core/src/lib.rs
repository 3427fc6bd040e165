//! # sync-core
//!
//! Pure logic for backsync (no I/O, instant tests).
//!
//! This crate implements the algorithms behind the background sync engine
//! without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects:
//! - [`chunker`] cuts files into fixed-size, resumable chunks
//! - [`backoff`] computes retry delays and per-kind retry ceilings
//! - [`conflict`] merges a local record against a newer remote one
//! - [`state`] drives task status transitions and yields actions
//!
//! The actual I/O (transport calls, persistence, timers) is performed by
//! `sync-client`, which interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod chunker;
pub mod conflict;
pub mod state;

pub use backoff::{BackoffPolicy, RetryLimits};
pub use chunker::{ChunkError, Chunker, SourceFile, DEFAULT_CHUNK_SIZE};
pub use conflict::{has_conflict, resolve};
pub use state::{on_event, RetryPolicy, SyncEvent, TaskAction, TaskEvent};
