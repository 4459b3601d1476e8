//! Connection circuit breaker
//!
//! Counts consecutive connection failures and fails fast once the count
//! reaches the threshold. The open circuit closes lazily: the first check
//! made after the cooldown has elapsed closes it and zeroes the counter.
//! There is no timer.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::CircuitBreakerConfig;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed (normal operation)
    #[default]
    Closed,
    /// Circuit is open (failing fast)
    Open,
}

/// Circuit breaker statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Current circuit state
    pub state: CircuitState,
    /// Current consecutive failure count
    pub consecutive_failures: u32,
    /// Configured threshold
    pub threshold: u32,
    /// Time since the last recorded failure
    pub time_since_last_failure: Option<Duration>,
    /// Number of times the circuit has opened
    pub trip_count: u64,
}

/// Consecutive-failure circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    open: bool,
    trip_count: u64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
            last_failure_at: None,
            open: false,
            trip_count: 0,
        }
    }

    /// Create a circuit breaker with default configuration
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Check whether an attempt may proceed.
    ///
    /// Returns the remaining cooldown when the circuit is open. A check made
    /// after the cooldown has elapsed closes the circuit.
    pub fn check(&mut self) -> Result<(), Duration> {
        if !self.open {
            return Ok(());
        }

        let elapsed = self
            .last_failure_at
            .map_or(self.config.cooldown, |at| at.elapsed());
        if elapsed >= self.config.cooldown {
            self.open = false;
            self.consecutive_failures = 0;
            return Ok(());
        }

        Err(self.config.cooldown - elapsed)
    }

    /// Record a connection failure
    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(Instant::now());

        if !self.open && self.consecutive_failures >= self.config.failure_threshold {
            self.open = true;
            self.trip_count += 1;
        }
    }

    /// Record a successful connect
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.open = false;
    }

    /// Get current circuit state without side effects
    pub fn state(&self) -> CircuitState {
        if self.open {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    /// Current consecutive failure count
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Get circuit breaker statistics
    pub fn statistics(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.state(),
            consecutive_failures: self.consecutive_failures,
            threshold: self.config.failure_threshold,
            time_since_last_failure: self.last_failure_at.map(|at| at.elapsed()),
            trip_count: self.trip_count,
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.last_failure_at = None;
        self.open = false;
    }
}
