//! Backoff schedule for opening connections
//!
//! A strategy answers one question: how long to wait before retry number
//! `attempt` (0-based), or `None` to give up. It holds no per-network state;
//! the [`ConnectionManager`](crate::ConnectionManager) tracks attempts itself
//! so one strategy can be shared by every network.
//!
//! # Examples
//!
//! ```rust
//! use chainsub_client::{ExponentialBackoff, ReconnectionStrategy};
//! use std::time::Duration;
//!
//! let backoff = ExponentialBackoff::new(Duration::from_millis(1000), 3);
//! assert_eq!(backoff.next_delay(0), Some(Duration::from_millis(1000)));
//! assert_eq!(backoff.next_delay(2), Some(Duration::from_millis(4000)));
//! assert_eq!(backoff.next_delay(3), None);
//! ```

use chainsub_core::ReconnectConfig;
use std::time::Duration;

/// Decides the delay before each retry
pub trait ReconnectionStrategy: Send + Sync {
    /// Delay before retry `attempt` (0-based), `None` once retries are exhausted
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// `base_delay * 2^attempt`, for at most `max_attempts` retries
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_attempts: u32,
    max_delay: Option<Duration>,
    jitter: bool,
}

impl ExponentialBackoff {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            max_delay: None,
            jitter: false,
        }
    }

    /// Build from the manager's reconnect configuration
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.reconnect_delay(), config.max_reconnect_attempts)
    }

    /// Cap individual delays
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Add up to 25% random jitter to each delay
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let base = self.base_delay.as_millis() as u64;
        let mut delay = base.saturating_mul(2u64.saturating_pow(attempt));
        if let Some(max) = self.max_delay {
            delay = delay.min(max.as_millis() as u64);
        }

        if self.jitter && delay >= 4 {
            use rand::Rng;
            delay += rand::thread_rng().gen_range(0..=(delay / 4));
        }

        Some(Duration::from_millis(delay))
    }
}
