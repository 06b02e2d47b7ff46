use core::time::Duration;

use crate::{Result, RetryPolicy};

/// Tunables for an [`Allocator`] and the stores it drives.
///
/// Durations are kept in milliseconds so the struct maps directly onto
/// environment variables and config files.
///
/// [`Allocator`]: crate::Allocator
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct AllocatorConfig {
    /// Total attempts per allocation, including the first.
    pub max_attempts: u32,
    /// Backoff after the first conflict.
    pub initial_backoff_ms: u64,
    /// Upper bound for any single backoff.
    pub max_backoff_ms: u64,
    /// Randomize each backoff within the upper half of its window.
    pub jitter: bool,
    /// How long a store may wait on a contended counter row before giving up
    /// with a transient conflict.
    pub lock_timeout_ms: u64,
}

impl AllocatorConfig {
    pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2_000;

    /// Checks the invariants the allocator relies on.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError("max_attempts must be at least 1".into()));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError(format!(
                "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            )));
        }
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError("lock_timeout_ms must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            jitter: self.jitter,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            max_attempts: retry.max_attempts,
            initial_backoff_ms: retry.initial_backoff.as_millis() as u64,
            max_backoff_ms: retry.max_backoff.as_millis() as u64,
            jitter: retry.jitter,
            lock_timeout_ms: Self::DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

/// A rejected [`AllocatorConfig`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid allocator config: {0}")]
pub struct ConfigError(pub String);
