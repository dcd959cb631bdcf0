//! Pool-wide circuit breaker
//!
//! The pool carries a single circuit breaker with three states:
//! - Closed: normal operation, acquires are allowed
//! - Open: the endpoint is failing, acquires are rejected
//! - HalfOpen: testing recovery, a limited number of acquires allowed
//!
//! The breaker transitions between states based on success/failure
//! patterns observed at release time. It is a plain struct mutated
//! under the pool lock; the manager is its only owner.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

/// Circuit breaker error types
#[derive(Debug, thiserror::Error)]
pub enum CircuitError {
    #[error("circuit breaker is open, retry in {retry_in:?}")]
    Open { retry_in: Duration },

    #[error("half-open circuit has reached its probe limit")]
    HalfOpenSaturated,
}

/// Circuit breaker states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests are allowed
    Closed,

    /// Endpoint has failed, requests are rejected until `retry_at`
    Open {
        /// When the circuit may transition to HalfOpen
        retry_at: Instant,

        /// Failure count at the moment the circuit opened
        failure_count: u32,
    },

    /// Testing recovery, limited requests allowed
    HalfOpen {
        /// Requests admitted since entering HalfOpen
        in_flight: u32,
    },
}

impl CircuitState {
    /// Get a human-readable state name
    pub fn name(&self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open { .. } => "Open",
            CircuitState::HalfOpen { .. } => "HalfOpen",
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Accumulated failures before opening the circuit
    pub failure_threshold: u32,

    /// How long to wait before transitioning from Open to HalfOpen
    pub recovery_timeout: Duration,

    /// Maximum requests admitted while HalfOpen
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

/// Circuit breaker for the pool's remote endpoint
///
/// Methods take `&mut self`; the pool manager serializes access through
/// its own lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Current circuit state
    state: CircuitState,

    /// Configuration
    config: CircuitBreakerConfig,

    /// Failure counter; incremented on failure, decayed on success
    failure_count: u32,

    /// Time of the most recent recorded failure
    last_failure_time: Option<Instant>,

    /// Total requests checked through the breaker
    total_requests: u64,

    /// Total successful outcomes
    total_successes: u64,

    /// Total failed outcomes
    total_failures: u64,

    /// Last state transition time
    last_transition: Instant,

    /// Number of times the circuit has opened
    open_count: u64,
}

impl CircuitBreaker {
    /// Create a new breaker in the Closed state
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            config,
            failure_count: 0,
            last_failure_time: None,
            total_requests: 0,
            total_successes: 0,
            total_failures: 0,
            last_transition: Instant::now(),
            open_count: 0,
        }
    }

    /// Check whether a request may proceed
    ///
    /// While Open, rejects until `recovery_timeout` has elapsed since the
    /// circuit opened, then transitions to HalfOpen and admits the caller
    /// as the first probe. While HalfOpen, admits up to
    /// `half_open_max_calls` requests before their outcomes arrive.
    pub fn check_request(&mut self) -> Result<(), CircuitError> {
        self.total_requests += 1;

        match &self.state {
            CircuitState::Closed => Ok(()),

            CircuitState::Open { retry_at, .. } => {
                let retry_at = *retry_at;
                if Instant::now() >= retry_at {
                    info!("circuit transitioning from Open to HalfOpen");
                    self.transition_to_half_open();
                    // The caller counts as the first half-open probe
                    self.state = CircuitState::HalfOpen { in_flight: 1 };
                    Ok(())
                } else {
                    Err(CircuitError::Open {
                        retry_in: retry_at.saturating_duration_since(Instant::now()),
                    })
                }
            }

            CircuitState::HalfOpen { in_flight } => {
                if *in_flight >= self.config.half_open_max_calls {
                    Err(CircuitError::HalfOpenSaturated)
                } else {
                    self.state = CircuitState::HalfOpen {
                        in_flight: in_flight + 1,
                    };
                    Ok(())
                }
            }
        }
    }

    /// Record a successful outcome
    ///
    /// In Closed, decays the failure counter by one. The first success in
    /// HalfOpen closes the circuit.
    pub fn record_success(&mut self) {
        self.total_successes += 1;

        match &self.state {
            CircuitState::Closed => {
                self.failure_count = self.failure_count.saturating_sub(1);
            }

            CircuitState::Open { .. } => {
                // Late outcome from before the circuit opened; ignore
                debug!("success recorded while Open, ignoring");
            }

            CircuitState::HalfOpen { .. } => {
                info!("circuit transitioning from HalfOpen to Closed");
                self.transition_to_closed();
            }
        }
    }

    /// Record a failed outcome
    ///
    /// In Closed, increments the failure counter and opens the circuit at
    /// the threshold. Any failure in HalfOpen reopens the circuit.
    pub fn record_failure(&mut self) {
        self.total_failures += 1;
        self.last_failure_time = Some(Instant::now());

        match &self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                debug!(
                    failure_count = self.failure_count,
                    threshold = self.config.failure_threshold,
                    "failure recorded in Closed state"
                );

                if self.failure_count >= self.config.failure_threshold {
                    warn!(
                        failure_count = self.failure_count,
                        "circuit transitioning from Closed to Open"
                    );
                    self.transition_to_open();
                }
            }

            CircuitState::Open { .. } => {
                debug!("failure recorded while Open");
            }

            CircuitState::HalfOpen { .. } => {
                warn!("failure in HalfOpen state, reopening circuit");
                self.transition_to_open();
            }
        }
    }

    /// Manually reset the circuit to Closed
    pub fn reset(&mut self) {
        info!("manually resetting circuit to Closed");
        self.transition_to_closed();
    }

    /// Current state
    pub fn state(&self) -> &CircuitState {
        &self.state
    }

    /// Whether the breaker is Closed
    pub fn is_closed(&self) -> bool {
        matches!(self.state, CircuitState::Closed)
    }

    /// Point-in-time statistics snapshot
    pub fn stats(&self) -> CircuitStats {
        CircuitStats {
            state: self.state.clone(),
            failure_count: self.failure_count,
            total_requests: self.total_requests,
            total_successes: self.total_successes,
            total_failures: self.total_failures,
            open_count: self.open_count,
            time_in_state: self.last_transition.elapsed(),
        }
    }

    fn transition_to_closed(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.last_failure_time = None;
        self.last_transition = Instant::now();
    }

    fn transition_to_open(&mut self) {
        self.state = CircuitState::Open {
            retry_at: Instant::now() + self.config.recovery_timeout,
            failure_count: self.failure_count,
        };
        self.open_count += 1;
        self.last_transition = Instant::now();
    }

    fn transition_to_half_open(&mut self) {
        self.state = CircuitState::HalfOpen { in_flight: 0 };
        self.last_transition = Instant::now();
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone)]
pub struct CircuitStats {
    /// Current state
    pub state: CircuitState,

    /// Current failure counter
    pub failure_count: u32,

    /// Total requests checked
    pub total_requests: u64,

    /// Total successful outcomes
    pub total_successes: u64,

    /// Total failed outcomes
    pub total_failures: u64,

    /// Number of times the circuit has opened
    pub open_count: u64,

    /// Time since last state transition
    pub time_in_state: Duration,
}
