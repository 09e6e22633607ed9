//! Bounded exponential backoff shared by the accept loop and the dialer.

use std::time::Duration;

/// Backoff schedule parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay applied after the first failure.
    pub initial_delay: Duration,
    /// Ceiling for the delay.
    pub max_delay: Duration,
    /// Growth factor applied after each failure (1 = fixed delay).
    pub multiplier: u32,
    /// Consecutive failures tolerated before giving up.
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            multiplier: 2,
            max_retries: 5,
        }
    }
}

/// Running backoff state: current delay and consecutive failure count.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current_delay: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            config,
            failures: 0,
        }
    }

    /// Return to the baseline after a success.
    pub fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.failures = 0;
    }

    /// Record a failure and return how long to wait before retrying.
    ///
    /// Returns `None` once the failure count exceeds `max_retries`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.failures > self.config.max_retries {
            return None;
        }

        let delay = self.current_delay;
        self.current_delay = delay
            .saturating_mul(self.config.multiplier.max(1))
            .min(self.config.max_delay);
        Some(delay.min(self.config.max_delay))
    }

    /// Consecutive failures recorded since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}
