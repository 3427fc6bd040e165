//! Engine configuration.

use std::time::Duration;
use sync_core::{BackoffPolicy, RetryLimits, RetryPolicy, DEFAULT_CHUNK_SIZE};

use crate::events::DEFAULT_EVENT_CAPACITY;

/// Configuration for [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upload chunk size in bytes.
    pub chunk_size: usize,
    /// Retry delay computation.
    pub backoff: BackoffPolicy,
    /// Per-kind retry ceilings, applied at enqueue time.
    pub retry_limits: RetryLimits,
    /// Event bus capacity per subscriber.
    pub event_capacity: usize,
    /// Whether the engine assumes connectivity before the first signal.
    pub start_online: bool,
    /// Retry terminal errors too, up to the ceiling.
    pub retry_terminal_errors: bool,
}

impl EngineConfig {
    /// Set the upload chunk size.
    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Set the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Backoff with no jitter (deterministic delays, useful in tests).
    pub fn with_fixed_backoff(mut self, base: Duration, max_delay: Duration) -> Self {
        self.backoff = BackoffPolicy::without_jitter(base, max_delay);
        self
    }

    /// Set the per-kind retry ceilings.
    pub fn with_retry_limits(mut self, limits: RetryLimits) -> Self {
        self.retry_limits = limits;
        self
    }

    /// Set the event bus capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the initial connectivity assumption.
    pub fn with_start_online(mut self, online: bool) -> Self {
        self.start_online = online;
        self
    }

    /// Retry every error, terminal or not, until the ceiling.
    pub fn with_retry_terminal_errors(mut self, retry: bool) -> Self {
        self.retry_terminal_errors = retry;
        self
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            backoff: self.backoff,
            retry_terminal_errors: self.retry_terminal_errors,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            backoff: BackoffPolicy::default(),
            retry_limits: RetryLimits::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            start_online: true,
            retry_terminal_errors: false,
        }
    }
}
