//! Connection pooling and circuit breaking
//!
//! This module provides:
//! - Per-connection records with a health state machine and rolling metrics
//! - A pool-wide circuit breaker for endpoint-level fault tolerance
//! - The pool manager orchestrating acquire, release, stats, and shutdown

pub mod circuit;
pub mod manager;
pub mod record;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitState, CircuitStats};
pub use manager::{
    ConnectionPoolManager, PoolConfig, PoolError, PoolStats, PooledConnection, RequestOutcome,
};
pub use record::{ConnectionId, ConnectionRecord, ConnectionSnapshot, ConnectionState};
