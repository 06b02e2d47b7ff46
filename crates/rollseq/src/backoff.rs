use core::time::Duration;

use rand::Rng;

/// Bounded exponential backoff between allocation attempts.
///
/// Attempt `n` (1-based) that ends in a conflict waits
/// `min(initial * 2^(n-1), max)` before attempt `n + 1`. With `jitter` the
/// wait is drawn uniformly from the upper half of that window, so two callers
/// that collided once are unlikely to collide again on the same tick.
///
/// # Example
///
/// ```
/// use core::time::Duration;
/// use rollseq::RetryPolicy;
///
/// let policy = RetryPolicy {
///     max_attempts: 5,
///     initial_backoff: Duration::from_millis(10),
///     max_backoff: Duration::from_millis(25),
///     jitter: false,
/// };
/// assert_eq!(policy.delay_for(1), Duration::from_millis(10));
/// assert_eq!(policy.delay_for(2), Duration::from_millis(20));
/// assert_eq!(policy.delay_for(3), Duration::from_millis(25));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(10);
    pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_millis(320);

    /// A policy that never retries.
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: false,
        }
    }

    /// How long to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let window = self
            .initial_backoff
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);

        if !self.jitter || window.is_zero() {
            return window;
        }
        let half = window / 2;
        let spread = (window - half).as_micros() as u64;
        half + Duration::from_micros(rand::rng().random_range(0..=spread))
    }

    /// Whether another attempt is allowed after `attempt` failed.
    pub const fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Self::DEFAULT_INITIAL_BACKOFF,
            max_backoff: Self::DEFAULT_MAX_BACKOFF,
            jitter: true,
        }
    }
}
