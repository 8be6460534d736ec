//! Retry policy for queued mutations.
//!
//! Controls how delivery failures classified as transient are retried.
//! Non-retryable failures (4xx-equivalent) never consult the policy - they
//! abandon the mutation immediately.

use std::time::Duration;

use crate::config::QueueConfig;

/// How a mutation handles transient delivery failures.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    /// No retries - abandon after the first failure.
    None,

    /// Fixed number of retries with constant delay between attempts.
    Fixed {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay between retry attempts.
        delay: Duration,
    },

    /// Exponential backoff with configurable parameters.
    ///
    /// The delay grows by `multiplier` after each failed attempt, up to a
    /// maximum delay. This is the recommended policy for network operations
    /// to avoid overwhelming services that may be temporarily overloaded.
    ExponentialBackoff {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay after the first failure.
        initial_delay: Duration,
        /// Cap on the delay.
        max_delay: Duration,
        /// Multiplier applied per attempt.
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

impl RetryPolicy {
    /// Builds the exponential policy described by a [`QueueConfig`].
    pub fn from_config(config: &QueueConfig) -> Self {
        Self::ExponentialBackoff {
            max_attempts: config.max_attempts,
            initial_delay: config.initial_delay,
            max_delay: config.max_delay,
            multiplier: config.backoff_factor,
        }
    }

    /// Creates an exponential backoff policy from the default queue config
    /// with a custom attempt ceiling.
    pub fn exponential(max_attempts: u32) -> Self {
        let defaults = QueueConfig::default();
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay: defaults.initial_delay,
            max_delay: defaults.max_delay,
            multiplier: defaults.backoff_factor,
        }
    }

    /// Calculates the delay before the given retry.
    ///
    /// # Arguments
    ///
    /// * `attempt` - The attempt number (1-based, where 1 is the first retry)
    ///
    /// # Returns
    ///
    /// The delay to wait before the retry, or `None` if no more retries are
    /// allowed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed { max_attempts, delay } => {
                if attempt < *max_attempts {
                    Some(*delay)
                } else {
                    None
                }
            }
            Self::ExponentialBackoff {
                max_attempts,
                initial_delay,
                max_delay,
                multiplier,
            } => {
                if attempt < *max_attempts {
                    let factor = multiplier.powi(attempt.saturating_sub(1) as i32);
                    let delay_ms = initial_delay.as_millis() as f64 * factor;
                    let delay =
                        Duration::from_millis(delay_ms.min(max_delay.as_millis() as f64) as u64);
                    Some(delay.min(*max_delay))
                } else {
                    None
                }
            }
        }
    }

    /// Returns the maximum number of attempts for this policy.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => *max_attempts,
            Self::ExponentialBackoff { max_attempts, .. } => *max_attempts,
        }
    }
}
