//! Per-connection state and rolling metrics
//!
//! Each pooled connection is tracked by a [`ConnectionRecord`] that owns the
//! underlying handle and carries a small health state machine plus rolling
//! performance metrics. Records are only ever mutated under the pool lock,
//! so the fields are plain values rather than atomics.

use std::time::Instant;

use tracing::debug;

/// Unique identifier for a pooled connection
pub type ConnectionId = u64;

/// EMA weight applied to the newest latency sample
const EMA_WEIGHT: f64 = 0.2;

/// Error-rate penalty added per failed request
const ERROR_RATE_STEP: f64 = 0.1;

/// Error-rate decay applied when a connection completes recovery
const ERROR_RATE_DECAY: f64 = 0.5;

/// Health state of a single pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Serving requests normally
    Healthy,

    /// Recent failures observed; still selectable at reduced weight
    Degraded,

    /// Too many consecutive failures; excluded until probed healthy
    Failed,

    /// A failed connection that passed one probe; one more closes the loop
    Recovering,
}

impl ConnectionState {
    /// Get a human-readable state name
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Healthy => "Healthy",
            ConnectionState::Degraded => "Degraded",
            ConnectionState::Failed => "Failed",
            ConnectionState::Recovering => "Recovering",
        }
    }

    /// Whether the acquire path may hand this connection to a caller
    pub fn is_admissible(&self) -> bool {
        matches!(self, ConnectionState::Healthy | ConnectionState::Degraded)
    }
}

/// State and metrics for one pooled connection
///
/// The handle is exclusively owned by the record; callers receive clones
/// while the record is busy.
#[derive(Debug)]
pub struct ConnectionRecord<H> {
    /// Stable identifier, unique for the lifetime of the pool
    pub id: ConnectionId,

    /// The underlying connection handle
    handle: H,

    /// Current health state
    state: ConnectionState,

    /// Total requests released through this connection
    pub requests_processed: u64,

    /// Exponential moving average of response time in milliseconds,
    /// seeded by the first observed sample
    avg_response_time: Option<f64>,

    /// Error rate in [0, 1]
    error_rate: f64,

    /// Consecutive failures, reset on success
    consecutive_failures: u32,

    /// Times this record transitioned Failed -> Recovering
    pub recovery_attempts: u32,

    /// Updated on every release
    pub last_used: Instant,

    /// Record creation time
    pub created_at: Instant,
}

impl<H> ConnectionRecord<H> {
    pub fn new(id: ConnectionId, handle: H) -> Self {
        let now = Instant::now();
        Self {
            id,
            handle,
            state: ConnectionState::Healthy,
            requests_processed: 0,
            avg_response_time: None,
            error_rate: 0.0,
            consecutive_failures: 0,
            recovery_attempts: 0,
            last_used: now,
            created_at: now,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn avg_response_time(&self) -> Option<f64> {
        self.avg_response_time
    }

    pub fn error_rate(&self) -> f64 {
        self.error_rate
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Take the handle out of the record when retiring it
    pub fn into_handle(self) -> H {
        self.handle
    }

    /// Fold a latency sample into the moving average
    pub fn observe_latency(&mut self, latency_ms: f64) {
        self.avg_response_time = Some(match self.avg_response_time {
            Some(avg) => EMA_WEIGHT * latency_ms + (1.0 - EMA_WEIGHT) * avg,
            None => latency_ms,
        });
    }

    /// Apply a successful release outcome
    pub fn on_success(&mut self) {
        self.consecutive_failures = 0;
        match self.state {
            ConnectionState::Recovering | ConnectionState::Degraded => {
                self.transition(ConnectionState::Healthy);
            }
            _ => {}
        }
    }

    /// Apply a failed release outcome; returns the resulting state
    pub fn on_failure(&mut self, degraded_after: u32, failed_after: u32) -> ConnectionState {
        self.consecutive_failures += 1;
        self.error_rate = (self.error_rate + ERROR_RATE_STEP).min(1.0);

        if self.consecutive_failures >= failed_after {
            self.transition(ConnectionState::Failed);
        } else if self.consecutive_failures >= degraded_after {
            self.transition(ConnectionState::Degraded);
        }
        self.state
    }

    /// Apply a successful health probe
    pub fn on_probe_success(&mut self) {
        match self.state {
            ConnectionState::Failed => {
                self.recovery_attempts += 1;
                self.transition(ConnectionState::Recovering);
            }
            ConnectionState::Recovering => {
                self.consecutive_failures = 0;
                self.error_rate *= ERROR_RATE_DECAY;
                self.transition(ConnectionState::Healthy);
            }
            _ => {}
        }
    }

    /// Apply a failed health probe; returns true if the record just
    /// crossed into `Failed`
    pub fn on_probe_failure(&mut self, failed_after: u32) -> bool {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= failed_after && self.state != ConnectionState::Failed {
            self.transition(ConnectionState::Failed);
            return true;
        }
        false
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(
                connection_id = self.id,
                from = self.state.name(),
                to = next.name(),
                "connection state transition"
            );
            self.state = next;
        }
    }

    /// Read-only view for observability collaborators
    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            id: self.id,
            state: self.state,
            requests_processed: self.requests_processed,
            avg_response_time: self.avg_response_time,
            error_rate: self.error_rate,
            consecutive_failures: self.consecutive_failures,
            recovery_attempts: self.recovery_attempts,
        }
    }
}

impl<H: Clone> ConnectionRecord<H> {
    /// Clone the handle for a caller or a probe
    pub fn clone_handle(&self) -> H {
        self.handle.clone()
    }
}

/// Point-in-time metrics for a single connection
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub state: ConnectionState,
    pub requests_processed: u64,
    pub avg_response_time: Option<f64>,
    pub error_rate: f64,
    pub consecutive_failures: u32,
    pub recovery_attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_healthy() {
        let record = ConnectionRecord::new(1, ());
        assert_eq!(record.state(), ConnectionState::Healthy);
        assert_eq!(record.error_rate(), 0.0);
        assert_eq!(record.avg_response_time(), None);
        assert!(record.state().is_admissible());
    }

    #[test]
    fn test_ema_seeding_and_update() {
        let mut record = ConnectionRecord::new(1, ());

        record.observe_latency(100.0);
        assert_eq!(record.avg_response_time(), Some(100.0));

        record.observe_latency(200.0);
        // 0.2 * 200 + 0.8 * 100 = 120
        assert!((record.avg_response_time().unwrap() - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_failure_state_machine() {
        let mut record = ConnectionRecord::new(1, ());

        assert_eq!(record.on_failure(1, 3), ConnectionState::Degraded);
        assert_eq!(record.on_failure(1, 3), ConnectionState::Degraded);
        assert_eq!(record.on_failure(1, 3), ConnectionState::Failed);
        assert_eq!(record.consecutive_failures(), 3);
        assert!(!record.state().is_admissible());
    }

    #[test]
    fn test_error_rate_caps_at_one() {
        let mut record = ConnectionRecord::new(1, ());
        for _ in 0..20 {
            record.on_failure(1, 100);
        }
        assert_eq!(record.error_rate(), 1.0);
    }

    #[test]
    fn test_success_resets_failures_and_heals_degraded() {
        let mut record = ConnectionRecord::new(1, ());
        record.on_failure(1, 3);
        assert_eq!(record.state(), ConnectionState::Degraded);

        record.on_success();
        assert_eq!(record.state(), ConnectionState::Healthy);
        assert_eq!(record.consecutive_failures(), 0);
    }

    #[test]
    fn test_probe_driven_recovery() {
        let mut record = ConnectionRecord::new(1, ());
        for _ in 0..3 {
            record.on_failure(1, 3);
        }
        assert_eq!(record.state(), ConnectionState::Failed);
        let rate_when_failed = record.error_rate();

        record.on_probe_success();
        assert_eq!(record.state(), ConnectionState::Recovering);
        assert_eq!(record.recovery_attempts, 1);

        record.on_probe_success();
        assert_eq!(record.state(), ConnectionState::Healthy);
        assert_eq!(record.consecutive_failures(), 0);
        assert!((record.error_rate() - rate_when_failed * 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_probe_failure_threshold() {
        let mut record = ConnectionRecord::new(1, ());

        for _ in 0..4 {
            assert!(!record.on_probe_failure(5));
        }
        assert!(record.on_probe_failure(5));
        assert_eq!(record.state(), ConnectionState::Failed);

        // Already failed, no second crossing
        assert!(!record.on_probe_failure(5));
    }
}
