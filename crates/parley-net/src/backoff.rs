//! Reconnect delay policy.

use std::time::Duration;

use parley_shared::constants::{
    DEFAULT_RECONNECT_BASE_MS, DEFAULT_RECONNECT_CAP_MS, DEFAULT_RECONNECT_MAX_ATTEMPTS,
};

/// Bounded exponential backoff: `min(base * 2^attempt, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    /// Number of automatic reconnect attempts before giving up.
    pub max_attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    /// Delay before the next attempt, given how many attempts were already made.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    /// Whether another automatic attempt may be scheduled.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
            Duration::from_millis(DEFAULT_RECONNECT_CAP_MS),
            DEFAULT_RECONNECT_MAX_ATTEMPTS,
        )
    }
}
