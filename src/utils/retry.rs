//! Exponential backoff with jitter
//!
//! Shared by the RPC pool, the block watcher, the WebSocket reconnect loop and
//! the attestation worker: `base * 2^(attempt-1)`, capped, then ±20% jitter.

use rand::Rng;
use std::time::Duration;

use crate::utils::constants::RETRY_JITTER_PERCENT;

/// Bounded exponential backoff policy
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base_ms: u64,
    pub max_ms: u64,
    pub max_attempts: u32,
}

impl Backoff {
    pub const fn new(base_ms: u64, max_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_ms,
            max_ms,
            max_attempts,
        }
    }

    /// Delay before retry number `attempt` (1-based), without jitter
    pub fn capped_delay_ms(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(20);
        self.base_ms.saturating_mul(1u64 << exp).min(self.max_ms)
    }

    /// Delay before retry number `attempt` with ±20% jitter, never below 100ms
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(with_jitter(self.capped_delay_ms(attempt)))
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

/// Apply ±RETRY_JITTER_PERCENT to a delay
pub fn with_jitter(delay_ms: u64) -> u64 {
    let jitter_range = (delay_ms * RETRY_JITTER_PERCENT / 100) as i64;
    let jitter: i64 = if jitter_range > 0 {
        rand::thread_rng().gen_range(-jitter_range..=jitter_range)
    } else {
        0
    };
    (delay_ms as i64 + jitter).max(100) as u64
}
