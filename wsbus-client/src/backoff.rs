//! Reconnection backoff strategies
//!
//! When the connection drops, the strategy decides how long to wait before
//! the next attempt. The default is exponential: 500ms doubling per failure
//! up to a 16s ceiling, reset to the initial delay whenever a connection
//! reaches Connected.
//!
//! # Examples
//!
//! ```rust
//! use wsbus_client::{BackoffStrategy, ExponentialBackoff};
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::default();
//! assert_eq!(backoff.next_delay(), Duration::from_millis(500));
//! assert_eq!(backoff.next_delay(), Duration::from_secs(1));
//!
//! backoff.reset();
//! assert_eq!(backoff.next_delay(), Duration::from_millis(500));
//! ```

use std::time::Duration;

/// Decides the delay before each reconnection attempt
///
/// The strategy accumulates state across failed attempts; `reset` is called
/// on every successful transition to Connected.
pub trait BackoffStrategy: Send + Sync {
    /// Delay to wait before the next attempt
    fn next_delay(&mut self) -> Duration;

    /// Forget accumulated state after a successful connection
    fn reset(&mut self);
}

/// Exponential backoff with optional jitter
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    jitter: bool,
    current: Duration,
}

impl ExponentialBackoff {
    /// Create a strategy doubling from `initial` up to `max`
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            jitter: false,
            current: initial,
        }
    }

    /// Add random jitter (up to 25% of the delay) to spread reconnect storms
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }
}

impl Default for ExponentialBackoff {
    /// 500ms initial delay, 16s ceiling, no jitter
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(16))
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = std::cmp::min(base * 2, self.max);

        if self.jitter {
            use rand::Rng;
            let jitter_ms = rand::thread_rng().gen_range(0..=(base.as_millis() as u64 / 4).max(1));
            base + Duration::from_millis(jitter_ms)
        } else {
            base
        }
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}
