//! Engine configuration and retry policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use rand::Rng;

/// Backoff policy shared by the execution client and the sync queue.
///
/// Delay for attempt `n` (zero-based) is `base_delay * multiplier^n`,
/// spread by up to `jitter` in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Exponential growth factor
    pub multiplier: f64,

    /// Jitter fraction in `[0, 1]`; 0 disables jitter
    pub jitter: f64,
}

impl RetryPolicy {
    /// Compute the backoff delay after a failed attempt.
    ///
    /// `attempt` is zero-based: the delay taken between attempt `n` and
    /// attempt `n + 1`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let spread = exp * self.jitter;
        let jittered = if spread > 0.0 {
            exp + rand::rng().random_range(-spread..=spread)
        } else {
            exp
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Backoff policy for submissions and queue replay
    pub retry: RetryPolicy,

    /// Per-attempt budget for one execution request
    pub submit_timeout: Duration,

    /// Max pending operations before the queue evicts
    pub queue_cap: usize,

    /// Submissions retained per exercise, most recent first
    pub history_cap: usize,

    /// Interval for the connectivity health probe
    pub probe_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            submit_timeout: Duration::from_secs(10),
            queue_cap: 50,
            history_cap: 10,
            probe_interval: Duration::from_secs(30),
        }
    }
}
