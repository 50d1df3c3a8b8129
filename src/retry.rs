//! Backoff with jitter for the update driver.
//!
//! The controller itself never retries. The driver re-invokes it on a fixed
//! interval while things go well, and stretches the gap exponentially (with
//! jitter) after consecutive failures so a broken cluster is not hammered.
//!
//! # Example
//!
//! ```ignore
//! use cluster_updater::retry::{Backoff, RetryConfig};
//!
//! let mut backoff = Backoff::new(RetryConfig::default());
//! loop {
//!     match controller.update_to_version(&target).await {
//!         Ok(_) => backoff.reset(),
//!         Err(_) => tokio::time::sleep(backoff.next_delay()).await,
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;

/// Configuration for the failure backoff.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config capped at `max_delay`
    pub fn with_max_delay(max_delay: Duration) -> Self {
        Self {
            max_delay,
            ..Default::default()
        }
    }
}

/// Exponential backoff state across consecutive failures
#[derive(Debug)]
pub struct Backoff {
    config: RetryConfig,
    failures: u32,
}

impl Backoff {
    /// Create a backoff with no recorded failures
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Number of consecutive failures recorded
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Forget recorded failures after a success
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Un-jittered delay for the current failure count, capped at max_delay
    pub fn base_delay(&self) -> Duration {
        let exponent = i32::try_from(self.failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.config.initial_delay.as_secs_f64()
            * self.config.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.config.max_delay.as_secs_f64()))
    }

    /// Record a failure and return how long to wait before the next attempt.
    ///
    /// Jitter spreads the delay between 0.5x and 1.5x of the base delay, still
    /// capped at max_delay.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let jittered = self.base_delay().as_secs_f64() * jitter;
        Duration::from_secs_f64(jittered.min(self.config.max_delay.as_secs_f64()))
    }
}
