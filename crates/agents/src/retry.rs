//! Backoff schedule for calls to the completion service.

use std::time::Duration;

use rand::Rng;

/// Exponent cap so the shift never overflows.
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Attempt budget and exponential backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Never below one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_500),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Policy that never sleeps; used by tests that exercise the retry loop.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Ceiling of the delay before retry number `attempt` (0-based):
    /// `base * 2^attempt`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_BACKOFF_EXPONENT);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// `delay_for(attempt)` with jitter in [50%, 100%].
    #[must_use]
    pub fn jittered_delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.delay_for(attempt);
        if ceiling.is_zero() {
            return ceiling;
        }
        let ratio = rand::rng().random_range(0.5..=1.0);
        ceiling.mul_f64(ratio)
    }

    /// Delay honouring a server-provided hint, still clamped to `max_delay`.
    #[must_use]
    pub fn delay_with_hint(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        match hint {
            Some(hint) => hint.min(self.max_delay),
            None => self.jittered_delay_for(attempt),
        }
    }
}

/// Statuses worth another attempt: request timeout, conflict, too early,
/// rate limited, and any server error.
#[must_use]
pub fn should_retry_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 425 | 429) || status >= 500
}
