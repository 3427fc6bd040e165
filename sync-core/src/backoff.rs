//! Retry backoff and retry ceilings.
//!
//! Formula: min(max_delay, base * 2^retry) + random(0..=max_jitter)
//!
//! Jitter spreads out retries when many tasks fail together, e.g. on a
//! shared connectivity loss.

use std::time::Duration;
use sync_types::TaskKind;

/// Default base delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default ceiling on the deterministic part of the delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5 * 60);

/// Default upper bound on jitter.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_secs(1);

// 2^20 seconds is already ~12 days; larger exponents only overflow.
const MAX_EXPONENT: u32 = 20;

/// Exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max_delay: Duration,
    max_jitter: Duration,
}

impl BackoffPolicy {
    /// Create a policy.
    pub fn new(base: Duration, max_delay: Duration, max_jitter: Duration) -> Self {
        Self {
            base,
            max_delay,
            max_jitter,
        }
    }

    /// A policy with no jitter (deterministic delays).
    pub fn without_jitter(base: Duration, max_delay: Duration) -> Self {
        Self::new(base, max_delay, Duration::ZERO)
    }

    /// Base delay.
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Ceiling on the deterministic component.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Upper bound on jitter.
    pub fn max_jitter(&self) -> Duration {
        self.max_jitter
    }

    /// Deterministic component for the given retry count.
    ///
    /// Non-decreasing in `retry_count`.
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32 << retry_count.min(MAX_EXPONENT);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before the next attempt: deterministic component plus jitter.
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        self.base_delay(retry_count) + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let bound = self.max_jitter.as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(random_u64() % (bound + 1))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_JITTER)
    }
}

/// Random u64 for jitter; falls back to zero if the OS source fails.
fn random_u64() -> u64 {
    let mut bytes = [0u8; 8];
    match getrandom::getrandom(&mut bytes) {
        Ok(()) => u64::from_le_bytes(bytes),
        Err(_) => 0,
    }
}

/// Per-kind retry ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryLimits {
    /// Ceiling for `FileUpload` tasks.
    pub file_upload: u32,
    /// Ceiling for `DataRecord` tasks.
    pub data_record: u32,
    /// Ceiling for `Preferences` tasks.
    pub preferences: u32,
}

impl RetryLimits {
    /// Ceiling for a task kind.
    pub fn for_kind(&self, kind: TaskKind) -> u32 {
        match kind {
            TaskKind::FileUpload => self.file_upload,
            TaskKind::DataRecord => self.data_record,
            TaskKind::Preferences => self.preferences,
        }
    }
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            file_upload: 5,
            data_record: 3,
            preferences: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_delay_doubles() {
        let policy =
            BackoffPolicy::without_jitter(Duration::from_secs(1), Duration::from_secs(600));
        assert_eq!(policy.base_delay(0), Duration::from_secs(1));
        assert_eq!(policy.base_delay(1), Duration::from_secs(2));
        assert_eq!(policy.base_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn base_delay_is_monotonic() {
        let policy = BackoffPolicy::default();
        for r in 0..64 {
            assert!(
                policy.base_delay(r + 1) >= policy.base_delay(r),
                "delay decreased between retry {} and {}",
                r,
                r + 1
            );
        }
    }

    #[test]
    fn base_delay_is_capped() {
        let policy = BackoffPolicy::without_jitter(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(policy.base_delay(10), Duration::from_secs(30));
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn huge_base_does_not_overflow() {
        let policy = BackoffPolicy::without_jitter(Duration::MAX / 2, Duration::from_secs(60));
        assert_eq!(policy.base_delay(5), Duration::from_secs(60));
    }

    #[test]
    fn no_jitter_means_exact_delays() {
        let policy =
            BackoffPolicy::without_jitter(Duration::from_millis(100), Duration::from_secs(10));
        assert_eq!(policy.next_delay(2), Duration::from_millis(400));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let policy = BackoffPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
            Duration::from_millis(500),
        );
        for _ in 0..50 {
            let delay = policy.next_delay(1);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_millis(2500));
        }
    }

    #[test]
    fn jitter_creates_variance() {
        let policy = BackoffPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
            Duration::from_secs(5),
        );
        let delays: Vec<Duration> = (0..20).map(|_| policy.next_delay(2)).collect();
        let min = delays.iter().min().unwrap();
        let max = delays.iter().max().unwrap();

        // 20 samples over 5001 jitter values; collision of all is vanishingly unlikely
        assert!(
            max.as_millis() - min.as_millis() >= 100,
            "Expected jitter variance, got min={:?} max={:?}",
            min,
            max
        );
    }

    #[test]
    fn uploads_get_more_retries_than_preferences() {
        let limits = RetryLimits::default();
        assert!(limits.for_kind(TaskKind::FileUpload) > limits.for_kind(TaskKind::Preferences));
        assert_eq!(limits.for_kind(TaskKind::DataRecord), 3);
    }
}
