//! # sync-client
//!
//! Background sync engine for backsync.
//!
//! Applications enqueue work (file uploads, data records, preferences) and
//! the engine delivers it to the server whenever connectivity allows,
//! surviving restarts, retrying transient failures with backoff and merging
//! concurrent record edits.
//!
//! ## Features
//!
//! - **Durable queue**: every task is persisted before it is acted on
//! - **Resumable uploads**: per-chunk checkpoints, no chunk is re-sent after a restart
//! - **Classified retries**: transient errors back off, terminal errors fail fast
//! - **Conflict merge**: field-level last-writer-wins before every record push
//! - **Transport abstraction**: pluggable transport layer (HTTP, mock)
//! - **Pure State Machine**: uses sync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use sync_client::{EngineConfig, HttpTransport, SyncEngine};
//! use sync_store::SqliteTaskStore;
//!
//! let transport = HttpTransport::new("https://sync.example.com", Duration::from_secs(30))?;
//! let store = SqliteTaskStore::new(Path::new("queue.db")).await?;
//! let engine = SyncEngine::new(transport, store, EngineConfig::default())?;
//!
//! engine.resume().await?;
//! let id = engine.enqueue_upload(&files, Priority::High).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod events;
pub mod transport;

pub use config::EngineConfig;
pub use connectivity::{ConnectivitySignal, DeferredExecution, ReconnectListener};
pub use engine::{DispatchOutcome, SyncEngine};
pub use error::EngineError;
pub use events::{EventBus, DEFAULT_EVENT_CAPACITY};
pub use sync_core::SyncEvent;
pub use transport::{ErrorClass, HttpTransport, MockTransport, Transport, TransportError};
