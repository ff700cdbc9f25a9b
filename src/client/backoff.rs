//! Exponential reconnect backoff with additive jitter.
//!
//! The unjittered delay for attempt `n` (1-based) is
//! `min(base * 2^(n-1), max)`. Up to 10% of that value is then added as
//! jitter, so the final delay lies in `[delay, 1.1 * delay)` and may exceed
//! `max` on capped attempts.

use std::time::Duration;

use rand::Rng;

use crate::config::ClientConfig;

/// Fraction of the capped delay used as the upper jitter bound.
pub const JITTER_FRACTION: f64 = 0.1;

/// Reconnect schedule derived from [`ClientConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base: Duration,
    max: Duration,
    max_attempts: u32,
}

impl ReconnectPolicy {
    /// Creates a policy from explicit bounds.
    #[must_use]
    pub const fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts,
        }
    }

    /// Returns the configured attempt cap.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns `true` while another automatic attempt is permitted after
    /// `attempts` consecutive failures.
    #[must_use]
    pub const fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Unjittered delay before attempt `attempt` (1-based).
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1_u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay before attempt `attempt` with `jitter` (clamped to `[0, 1)`)
    /// scaled by [`JITTER_FRACTION`] and added on top of the capped delay.
    #[must_use]
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let base = self.base_delay(attempt);
        let unit = jitter.clamp(0.0, 1.0 - f64::EPSILON);
        base + base.mul_f64(unit * JITTER_FRACTION)
    }

    /// Delay before attempt `attempt` with random jitter.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..1.0);
        self.delay_with_jitter(attempt, jitter)
    }
}

impl From<&ClientConfig> for ReconnectPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self::new(
            config.base_reconnect_delay,
            config.max_reconnect_delay,
            config.max_reconnect_attempts,
        )
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}
