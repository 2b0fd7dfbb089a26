//! Failure gate in front of the provider transport.
//!
//! After `failure_threshold` consecutive outages the circuit opens and calls
//! are refused locally until `open_timeout` has passed. Then exactly one trial call
//! is admitted; its result closes the circuit or opens it again.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive outages that open the circuit.
    pub failure_threshold: u32,
    /// Time spent open before a trial call is let through.
    #[serde(with = "crate::config::duration_secs")]
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_timeout: Duration::from_secs(30),
        }
    }
}

/// A call refused without reaching the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("circuit open, next trial call in {}ms", retry_in.as_millis())]
pub struct CircuitOpen {
    /// Zero while a half-open trial call is still outstanding.
    pub retry_in: Duration,
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_pending: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuit: Mutex<Circuit>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuit: Mutex::new(Circuit {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_pending: false,
            }),
        }
    }

    /// Admit a call, or report how long the circuit stays shut.
    pub fn admit(&self) -> Result<(), CircuitOpen> {
        let mut circuit = self.lock();
        match circuit.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen if circuit.trial_pending => Err(CircuitOpen {
                retry_in: Duration::ZERO,
            }),
            CircuitState::HalfOpen => {
                circuit.trial_pending = true;
                Ok(())
            }
            CircuitState::Open => {
                let elapsed = circuit
                    .opened_at
                    .map_or(self.config.open_timeout, |opened_at| opened_at.elapsed());
                if elapsed < self.config.open_timeout {
                    return Err(CircuitOpen {
                        retry_in: self.config.open_timeout - elapsed,
                    });
                }
                tracing::debug!("upstream circuit half-open, admitting a trial call");
                circuit.state = CircuitState::HalfOpen;
                circuit.opened_at = None;
                circuit.trial_pending = true;
                Ok(())
            }
        }
    }

    /// The provider answered; any response short of a server error counts.
    pub fn record_success(&self) {
        let mut circuit = self.lock();
        if circuit.state != CircuitState::Closed {
            tracing::info!("upstream circuit closed");
        }
        circuit.state = CircuitState::Closed;
        circuit.consecutive_failures = 0;
        circuit.opened_at = None;
        circuit.trial_pending = false;
    }

    pub fn record_failure(&self) {
        let mut circuit = self.lock();
        circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);
        circuit.trial_pending = false;

        let trips = circuit.state == CircuitState::HalfOpen
            || circuit.consecutive_failures >= self.config.failure_threshold.max(1);
        if trips {
            if circuit.state != CircuitState::Open {
                tracing::warn!(
                    failures = circuit.consecutive_failures,
                    open_for_ms = u64::try_from(self.config.open_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                    "upstream circuit opened"
                );
            }
            circuit.state = CircuitState::Open;
            circuit.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    fn lock(&self) -> MutexGuard<'_, Circuit> {
        self.circuit.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, open_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold,
            open_timeout: Duration::from_secs(open_secs),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn an_open_circuit_reports_the_remaining_wait() {
        let breaker = breaker(2, 10);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(4)).await;
        let refused = breaker.admit().expect_err("open");
        assert_eq!(refused.retry_in, Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_a_single_trial_call() {
        let breaker = breaker(1, 5);
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(breaker.admit().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(
            breaker.admit(),
            Err(CircuitOpen {
                retry_in: Duration::ZERO
            })
        );

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(breaker.admit().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn a_failed_trial_call_reopens_for_a_full_timeout() {
        let breaker = breaker(3, 5);
        for _ in 0..3 {
            breaker.record_failure();
        }
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(breaker.admit().is_ok());

        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(
            breaker.admit().map_err(|open| open.retry_in),
            Err(Duration::from_secs(5))
        );
    }
}
