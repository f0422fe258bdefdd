//! Circuit breaker guarding outbound service calls.
//!
//! The breaker tracks consecutive terminal failures per named instance.
//! Once the failure streak reaches the configured threshold, calls fail
//! fast with [`AppError::CircuitOpen`] until the reset window has elapsed
//! since the last failure; a single success closes the circuit again.

use crate::error::{AppError, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration for a circuit breaker
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// How long the circuit stays open after the last failure
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// A thread-safe circuit breaker shared across concurrent callers
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Arc<RwLock<BreakerState>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        debug!(name = %name, config = ?config, "creating circuit breaker");

        Self {
            name,
            config,
            state: Arc::new(RwLock::new(BreakerState::default())),
        }
    }

    /// Get the name of this circuit breaker
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fail fast if the circuit is open; otherwise allow the call.
    ///
    /// A rejected call performs no network attempt and consumes no retry.
    pub fn check(&self) -> Result<()> {
        if self.is_open() {
            warn!(name = %self.name, "circuit open, rejecting call");
            return Err(AppError::CircuitOpen(self.name.clone()));
        }
        Ok(())
    }

    /// Whether the circuit is currently open
    pub fn is_open(&self) -> bool {
        let state = self.state.read();
        if state.consecutive_failures < self.config.failure_threshold {
            return false;
        }
        match state.last_failure {
            Some(at) => at.elapsed() < self.config.reset_timeout,
            None => false,
        }
    }

    /// Record a successful call; closes the circuit
    pub fn record_success(&self) {
        let mut state = self.state.write();
        if state.consecutive_failures >= self.config.failure_threshold {
            info!(name = %self.name, "circuit closed after successful call");
        }
        state.consecutive_failures = 0;
        state.last_failure = None;
    }

    /// Record a terminal call failure
    pub fn record_failure(&self) {
        let mut state = self.state.write();
        state.consecutive_failures += 1;
        state.last_failure = Some(Instant::now());

        if state.consecutive_failures == self.config.failure_threshold {
            warn!(
                name = %self.name,
                consecutive_failures = state.consecutive_failures,
                reset_timeout_secs = self.config.reset_timeout.as_secs(),
                "failure threshold reached, circuit opened"
            );
        } else {
            debug!(
                name = %self.name,
                consecutive_failures = state.consecutive_failures,
                "call failure recorded"
            );
        }
    }

    /// Current consecutive-failure streak
    pub fn consecutive_failures(&self) -> u32 {
        self.state.read().consecutive_failures
    }
}
