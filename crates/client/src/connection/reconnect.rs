//! Exponential backoff between reconnect attempts.

use std::time::Duration;

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive reconnect attempts (0 = never reconnect)
    pub max_attempts: u32,
    /// Delay before the first reconnect attempt
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after every failed attempt
    pub backoff_multiplier: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            backoff_multiplier: 2,
        }
    }
}

impl ReconnectConfig {
    /// Delay after the `failures`-th consecutive failure (1-based):
    /// `initial_delay * backoff_multiplier^(failures - 1)`.
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .saturating_pow(failures.saturating_sub(1));
        self.initial_delay.saturating_mul(factor)
    }
}

/// Retry counter and current delay of a connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    retries: u32,
    delay: Duration,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        let delay = config.initial_delay;
        Self {
            config,
            retries: 0,
            delay,
        }
    }

    /// Called on every successful open.
    pub fn reset(&mut self) {
        self.retries = 0;
        self.delay = self.config.initial_delay;
    }

    /// Reconnect attempts scheduled since the last successful open.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Delay the next reconnect would wait.
    pub fn current_delay(&self) -> Duration {
        self.delay
    }

    /// Record a failure. Returns the delay to wait before reconnecting, or
    /// `None` once the retry budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.config.max_attempts {
            return None;
        }
        let delay = self.delay;
        self.retries += 1;
        self.delay = self.delay.saturating_mul(self.config.backoff_multiplier);
        Some(delay)
    }
}
