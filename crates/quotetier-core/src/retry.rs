//! Bounded retry delays for transient upstream failures.

use std::time::Duration;

use serde::Deserialize;

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed {
        delay: Duration,
    },
    /// `base * factor^attempt`, capped at `max`, optionally jittered by +/- 50%.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(200),
            factor: 2.0,
            max: Duration::from_secs(3),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let seconds = (base.as_secs_f64() * factor.powi(exponent)).min(max.as_secs_f64());
                let delay = Duration::from_secs_f64(seconds.max(0.0));

                if !jitter {
                    return delay;
                }
                let half_ms = u64::try_from(delay.as_millis() / 2).unwrap_or(u64::MAX / 2);
                let offset = fastrand::u64(0..=half_ms.saturating_mul(2));
                let total_ms = u64::try_from(delay.as_millis())
                    .unwrap_or(u64::MAX)
                    .saturating_add(offset)
                    .saturating_sub(half_ms);
                Duration::from_millis(total_ms)
            }
        }
    }
}

/// Retry policy for `ProviderUnavailable` failures.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first; `1` disables retries.
    pub max_attempts: u32,
    #[serde(with = "crate::config::duration_millis")]
    pub base_delay: Duration,
    #[serde(with = "crate::config::duration_millis")]
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(3),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::Exponential {
            base: self.base_delay,
            factor: 2.0,
            max: self.max_delay,
            jitter: self.jitter,
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff().delay(attempt)
    }
}
