//! Pool orchestration: acquire, release, stats, shutdown
//!
//! The manager owns every connection record and serializes all pool
//! bookkeeping through a single mutex. Factory and probe I/O always runs
//! outside the lock; blocked acquirers park on a [`Notify`] and are woken
//! by releases.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::endpoint::{ConnectionFactory, ConnectionProbe, EndpointError};
use crate::lb::{Candidate, LoadBalancer, Strategy};

use super::circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitStats};
use super::record::{ConnectionId, ConnectionRecord, ConnectionSnapshot, ConnectionState};

/// Error types for pool operations
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("circuit breaker rejected acquire: {0}")]
    CircuitOpen(String),

    #[error("no connection available within {0:?}")]
    PoolExhausted(Duration),

    #[error("failed to create connection")]
    ConnectionCreateFailed(#[source] EndpointError),

    #[error("pool is shut down")]
    ShutDown,
}

/// Configuration for pool behavior
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections created at initialization and kept through retirement
    pub min_connections: usize,

    /// Hard cap on live connections, in-flight creations included
    pub max_connections: usize,

    /// How long an acquire may wait before giving up
    pub acquire_timeout: Duration,

    /// How long shutdown waits for busy connections to come back
    pub shutdown_timeout: Duration,

    /// Consecutive failures before a connection is marked Degraded
    pub degraded_after: u32,

    /// Consecutive failures before a connection is marked Failed
    pub failed_after: u32,

    /// Selection strategy for the load balancer
    pub strategy: Strategy,

    /// Circuit breaker settings
    pub circuit: CircuitBreakerConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
            degraded_after: 1,
            failed_after: 3,
            strategy: Strategy::WeightedRandom,
            circuit: CircuitBreakerConfig::default(),
        }
    }
}

/// Outcome reported when a connection is released
#[derive(Debug, Clone, Copy)]
pub enum RequestOutcome {
    /// The request completed; latency feeds the connection's average
    Success { latency_ms: f64 },

    /// The request failed in a way attributable to the connection
    Failure,
}

/// A connection checked out of the pool
///
/// Callers use the handle clone and must hand `id` back to
/// [`ConnectionPoolManager::release`] when done.
#[derive(Debug)]
pub struct PooledConnection<H> {
    pub id: ConnectionId,
    pub handle: H,
}

/// Statistics for the pool
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Live connections, idle and busy
    pub total_connections: usize,

    /// Idle connections (all states)
    pub idle_connections: usize,

    /// Connections currently checked out
    pub busy_connections: usize,

    /// Total connections created over the pool's lifetime
    pub total_created: u64,

    /// Total connections retired
    pub total_retired: u64,

    /// Total acquires served from an existing connection
    pub total_reused: u64,

    /// Circuit breaker snapshot
    pub circuit: CircuitStats,

    /// Per-connection snapshots
    pub connections: Vec<ConnectionSnapshot>,
}

struct PoolState<H> {
    records: HashMap<ConnectionId, ConnectionRecord<H>>,

    /// Idle record ids in release order. Failed records stay here so the
    /// monitor can probe them; the candidate filter keeps them from
    /// being handed out.
    idle: Vec<ConnectionId>,

    /// Records currently checked out
    busy: HashSet<ConnectionId>,

    breaker: CircuitBreaker,
    next_id: ConnectionId,

    /// Creations in flight, counted against `max_connections`
    growing: usize,

    initialized: bool,
    shutting_down: bool,
    total_created: u64,
    total_retired: u64,
    total_reused: u64,
}

struct PoolInner<F: ConnectionFactory, P> {
    factory: Arc<F>,
    probe: Arc<P>,
    config: PoolConfig,
    balancer: LoadBalancer,
    state: Mutex<PoolState<F::Handle>>,
    released: Notify,
    shutdown_tx: watch::Sender<bool>,
}

/// Adaptive connection pool for a single remote endpoint
pub struct ConnectionPoolManager<F: ConnectionFactory, P> {
    inner: Arc<PoolInner<F, P>>,
}

impl<F: ConnectionFactory, P> Clone for ConnectionPoolManager<F, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

enum Admission<H> {
    Acquired(PooledConnection<H>),
    Grow,
    Wait,
    Rejected(PoolError),
}

/// Releases a reserved grow slot if connection creation is abandoned
struct GrowSlot<'a, H> {
    state: &'a Mutex<PoolState<H>>,
    armed: bool,
}

impl<H> GrowSlot<'_, H> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<H> Drop for GrowSlot<'_, H> {
    fn drop(&mut self) {
        if self.armed {
            if let Ok(mut state) = self.state.lock() {
                state.growing = state.growing.saturating_sub(1);
            }
        }
    }
}

impl<F, P> ConnectionPoolManager<F, P>
where
    F: ConnectionFactory,
    P: ConnectionProbe<F::Handle>,
{
    /// Create a new, empty pool manager
    pub fn new(factory: F, probe: P, config: PoolConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let balancer = LoadBalancer::new(config.strategy);
        let breaker = CircuitBreaker::new(config.circuit.clone());
        Self {
            inner: Arc::new(PoolInner {
                factory: Arc::new(factory),
                probe: Arc::new(probe),
                config,
                balancer,
                state: Mutex::new(PoolState {
                    records: HashMap::new(),
                    idle: Vec::new(),
                    busy: HashSet::new(),
                    breaker,
                    next_id: 1,
                    growing: 0,
                    initialized: false,
                    shutting_down: false,
                    total_created: 0,
                    total_retired: 0,
                    total_reused: 0,
                }),
                released: Notify::new(),
                shutdown_tx,
            }),
        }
    }

    /// Pre-create `min_connections` idle connections
    ///
    /// Individual creation failures are logged, fed to the circuit
    /// breaker, and skipped; the pool may start under-provisioned. The
    /// call only errors when every creation fails. Idempotent: after one
    /// success, further calls are no-ops.
    pub async fn initialize(&self) -> Result<(), PoolError> {
        if self.lock_state().initialized {
            debug!("pool already initialized");
            return Ok(());
        }

        let min = self.inner.config.min_connections;
        info!(min_connections = min, "initializing pool");

        let mut created = 0usize;
        let mut last_err = None;
        for _ in 0..min {
            let handle = match self.inner.factory.create().await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(error = %e, "initial connection creation failed");
                    let mut state = self.lock_state();
                    state.breaker.record_failure();
                    last_err = Some(e);
                    continue;
                }
            };

            let mut state = self.lock_state();
            let id = state.next_id;
            state.next_id += 1;
            state.records.insert(id, ConnectionRecord::new(id, handle));
            state.idle.push(id);
            state.total_created += 1;
            created += 1;
            debug!(connection_id = id, "created initial connection");
        }

        if created == 0 {
            if let Some(e) = last_err {
                return Err(PoolError::ConnectionCreateFailed(e));
            }
        }

        self.lock_state().initialized = true;
        Ok(())
    }

    /// Check out a connection
    ///
    /// Selection prefers healthy, fast, low-error connections. When no
    /// admissible connection is idle the pool grows up to
    /// `max_connections`; past that the caller waits for a release until
    /// `acquire_timeout` expires.
    pub async fn acquire(&self) -> Result<PooledConnection<F::Handle>, PoolError> {
        self.acquire_with_priority(None).await
    }

    /// [`acquire`](Self::acquire) with a routing hint
    ///
    /// The hint is forwarded to the load balancer; current strategies
    /// ignore it.
    pub async fn acquire_with_priority(
        &self,
        priority_hint: Option<u8>,
    ) -> Result<PooledConnection<F::Handle>, PoolError> {
        let deadline = tokio::time::Instant::now() + self.inner.config.acquire_timeout;

        loop {
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            // Register interest before re-checking state so a release
            // between the check and the await is not lost
            notified.as_mut().enable();

            match self.try_admit(priority_hint) {
                Admission::Acquired(conn) => {
                    debug!(connection_id = conn.id, "acquired connection");
                    return Ok(conn);
                }
                Admission::Rejected(err) => return Err(err),
                Admission::Grow => return self.grow_and_acquire().await,
                Admission::Wait => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(PoolError::PoolExhausted(self.inner.config.acquire_timeout));
                    }
                }
            }
        }
    }

    fn try_admit(&self, priority_hint: Option<u8>) -> Admission<F::Handle> {
        let mut state = self.lock_state();

        if state.shutting_down {
            return Admission::Rejected(PoolError::ShutDown);
        }

        if let Err(e) = state.breaker.check_request() {
            return Admission::Rejected(PoolError::CircuitOpen(e.to_string()));
        }

        let candidates: Vec<Candidate> = state
            .idle
            .iter()
            .filter_map(|id| state.records.get(id))
            .filter(|r| r.state().is_admissible())
            .map(|r| Candidate {
                id: r.id,
                state: r.state(),
                avg_response_time: r.avg_response_time(),
                error_rate: r.error_rate(),
            })
            .collect();

        if let Some(id) = self.inner.balancer.select(&candidates, priority_hint) {
            state.idle.retain(|&other| other != id);
            state.busy.insert(id);
            state.total_reused += 1;
            let record = state
                .records
                .get(&id)
                .expect("selected id missing from records");
            let handle = record.clone_handle();
            return Admission::Acquired(PooledConnection { id, handle });
        }

        if state.records.len() + state.growing < self.inner.config.max_connections {
            state.growing += 1;
            return Admission::Grow;
        }

        Admission::Wait
    }

    async fn grow_and_acquire(&self) -> Result<PooledConnection<F::Handle>, PoolError> {
        let mut slot = GrowSlot {
            state: &self.inner.state,
            armed: true,
        };

        match self.inner.factory.create().await {
            Ok(handle) => {
                let caller_handle = handle.clone();
                let id = {
                    let mut state = self.lock_state();
                    state.growing = state.growing.saturating_sub(1);
                    let id = state.next_id;
                    state.next_id += 1;
                    state.records.insert(id, ConnectionRecord::new(id, handle));
                    state.busy.insert(id);
                    state.total_created += 1;
                    id
                };
                slot.disarm();
                info!(connection_id = id, "pool grew by one connection");
                Ok(PooledConnection {
                    id,
                    handle: caller_handle,
                })
            }
            Err(e) => {
                warn!(error = %e, "connection creation failed");
                let mut state = self.lock_state();
                state.breaker.record_failure();
                drop(state);
                Err(PoolError::ConnectionCreateFailed(e))
            }
        }
    }

    /// Return a connection and report how the request went
    ///
    /// Updates the record's metrics and state machine, feeds the circuit
    /// breaker, and wakes one blocked acquirer if any. Unknown or stale
    /// ids are logged and ignored.
    pub async fn release(&self, id: ConnectionId, outcome: RequestOutcome) {
        let to_destroy = {
            let mut state = self.lock_state();

            if !state.busy.remove(&id) {
                warn!(connection_id = id, "release of a connection that is not busy");
                return;
            }

            let Some(record) = state.records.get_mut(&id) else {
                warn!(connection_id = id, "release of an unknown connection");
                return;
            };

            record.requests_processed += 1;
            record.last_used = Instant::now();

            match outcome {
                RequestOutcome::Success { latency_ms } => {
                    record.observe_latency(latency_ms);
                    record.on_success();
                    state.breaker.record_success();
                }
                RequestOutcome::Failure => {
                    let next = record.on_failure(
                        self.inner.config.degraded_after,
                        self.inner.config.failed_after,
                    );
                    if next == ConnectionState::Failed {
                        warn!(connection_id = id, "connection marked Failed");
                    }
                    state.breaker.record_failure();
                }
            }

            if state.shutting_down {
                state.total_retired += 1;
                state.records.remove(&id).map(|r| r.into_handle())
            } else {
                state.idle.push(id);
                None
            }
        };

        self.inner.released.notify_waiters();

        if let Some(handle) = to_destroy {
            self.inner.factory.destroy(handle).await;
        }
    }

    /// Point-in-time statistics snapshot
    pub fn stats(&self) -> PoolStats {
        let state = self.lock_state();
        PoolStats {
            total_connections: state.records.len(),
            idle_connections: state.idle.len(),
            busy_connections: state.busy.len(),
            total_created: state.total_created,
            total_retired: state.total_retired,
            total_reused: state.total_reused,
            circuit: state.breaker.stats(),
            connections: state.records.values().map(|r| r.snapshot()).collect(),
        }
    }

    /// Manually reset the circuit breaker to Closed
    pub fn reset_circuit(&self) {
        let mut state = self.lock_state();
        state.breaker.reset();
    }

    /// Stop accepting acquires, drain busy connections, destroy everything
    ///
    /// Waits up to `shutdown_timeout` for checked-out connections to be
    /// released; whatever is still busy after that is abandoned to its
    /// holder.
    pub async fn shutdown(&self) {
        let first = {
            let mut state = self.lock_state();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            Self::drain_idle(&mut state)
        };

        let _ = self.inner.shutdown_tx.send(true);
        self.inner.released.notify_waiters();

        info!(draining = first.len(), "pool shutting down");
        for handle in first {
            self.inner.factory.destroy(handle).await;
        }

        let deadline = tokio::time::Instant::now() + self.inner.config.shutdown_timeout;
        loop {
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (drained, busy_left) = {
                let mut state = self.lock_state();
                (Self::drain_idle(&mut state), state.busy.len())
            };
            for handle in drained {
                self.inner.factory.destroy(handle).await;
            }

            if busy_left == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!(
                    busy = busy_left,
                    "shutdown drain timed out, abandoning busy connections"
                );
                break;
            }
        }

        info!("pool shut down");
    }

    /// Whether shutdown has begun
    pub fn is_shut_down(&self) -> bool {
        self.lock_state().shutting_down
    }

    /// Receiver that flips to `true` when shutdown begins
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown_tx.subscribe()
    }

    /// Idle records the health monitor should probe this cycle
    pub fn probe_targets(&self) -> Vec<(ConnectionId, F::Handle)> {
        let state = self.lock_state();
        state
            .idle
            .iter()
            .filter_map(|id| state.records.get(id))
            .map(|r| (r.id, r.clone_handle()))
            .collect()
    }

    /// Fold one probe result back into the pool
    ///
    /// Results for records that were acquired mid-probe are dropped; the
    /// caller's own outcome supersedes a stale probe. A probe failure
    /// that pushes a record over `failure_threshold` counts as a circuit
    /// breaker failure.
    pub fn apply_probe_outcome(&self, id: ConnectionId, success: bool, failure_threshold: u32) {
        let healed = {
            let mut state = self.lock_state();

            if state.busy.contains(&id) {
                return;
            }
            let Some(record) = state.records.get_mut(&id) else {
                return;
            };

            if success {
                let before = record.state();
                record.on_probe_success();
                record.state() != before && record.state().is_admissible()
            } else {
                if record.on_probe_failure(failure_threshold) {
                    warn!(connection_id = id, "probe failures marked connection Failed");
                    state.breaker.record_failure();
                }
                false
            }
        };

        // A record that just became selectable can satisfy a parked acquire
        if healed {
            self.inner.released.notify_waiters();
        }
    }

    /// Retire idle connections and return their handles for destruction
    ///
    /// Two retirement rules run in one sweep: Failed records past their
    /// recovery budget go unconditionally, and stale-idle records go only
    /// while the pool stays at or above `min_connections`.
    pub fn sweep_retirable(&self, max_idle_time: Duration, max_recovery_attempts: u32) -> Vec<F::Handle> {
        let mut state = self.lock_state();
        let min = self.inner.config.min_connections;

        let mut retire: Vec<ConnectionId> = Vec::new();
        for id in &state.idle {
            let Some(record) = state.records.get(id) else {
                continue;
            };
            let terminal = record.state() == ConnectionState::Failed
                && record.recovery_attempts >= max_recovery_attempts;
            if terminal {
                retire.push(*id);
            }
        }

        let live_after_terminal = state.records.len() - retire.len();
        if live_after_terminal > min {
            let mut spare = live_after_terminal - min;
            for id in &state.idle {
                if spare == 0 {
                    break;
                }
                if retire.contains(id) {
                    continue;
                }
                let Some(record) = state.records.get(id) else {
                    continue;
                };
                if record.last_used.elapsed() >= max_idle_time {
                    retire.push(*id);
                    spare -= 1;
                }
            }
        }

        let mut handles = Vec::with_capacity(retire.len());
        for id in retire {
            state.idle.retain(|&other| other != id);
            if let Some(record) = state.records.remove(&id) {
                info!(
                    connection_id = id,
                    state = record.state().name(),
                    "retiring connection"
                );
                state.total_retired += 1;
                handles.push(record.into_handle());
            }
        }
        handles
    }

    /// Factory shared with the health monitor for retirement destroys
    pub fn factory(&self) -> Arc<F> {
        Arc::clone(&self.inner.factory)
    }

    /// Probe shared with the health monitor
    pub fn probe(&self) -> Arc<P> {
        Arc::clone(&self.inner.probe)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState<F::Handle>> {
        self.inner.state.lock().expect("pool state lock poisoned")
    }

    fn drain_idle(state: &mut PoolState<F::Handle>) -> Vec<F::Handle> {
        let ids: Vec<ConnectionId> = state.idle.drain(..).collect();
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = state.records.remove(&id) {
                state.total_retired += 1;
                handles.push(record.into_handle());
            }
        }
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct MockFactory {
        created: AtomicU64,
        destroyed: AtomicU64,
        fail_creates: AtomicBool,
        fail_next: AtomicU64,
    }

    impl MockFactory {
        fn new() -> Self {
            Self {
                created: AtomicU64::new(0),
                destroyed: AtomicU64::new(0),
                fail_creates: AtomicBool::new(false),
                fail_next: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl ConnectionFactory for Arc<MockFactory> {
        type Handle = u64;

        async fn create(&self) -> Result<u64, EndpointError> {
            if self.fail_creates.load(Ordering::SeqCst) {
                return Err(EndpointError::ConnectFailed("mock refusal".to_string()));
            }
            if self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(EndpointError::ConnectFailed("mock refusal".to_string()));
            }
            Ok(self.created.fetch_add(1, Ordering::SeqCst))
        }

        async fn destroy(&self, _handle: u64) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct MockProbe {
        healthy: AtomicBool,
    }

    #[async_trait]
    impl ConnectionProbe<u64> for Arc<MockProbe> {
        async fn check(&self, _handle: &u64, _timeout: Duration) -> Result<bool, EndpointError> {
            Ok(self.healthy.load(Ordering::SeqCst))
        }
    }

    fn test_pool(
        config: PoolConfig,
    ) -> (
        ConnectionPoolManager<Arc<MockFactory>, Arc<MockProbe>>,
        Arc<MockFactory>,
    ) {
        let factory = Arc::new(MockFactory::new());
        let probe = Arc::new(MockProbe {
            healthy: AtomicBool::new(true),
        });
        let pool = ConnectionPoolManager::new(Arc::clone(&factory), probe, config);
        (pool, factory)
    }

    fn small_config() -> PoolConfig {
        PoolConfig {
            min_connections: 2,
            max_connections: 3,
            acquire_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_initialize_creates_min_connections() {
        let (pool, factory) = test_pool(small_config());
        pool.initialize().await.unwrap();

        let stats = pool.stats();
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.idle_connections, 2);
        assert_eq!(stats.busy_connections, 0);
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (pool, factory) = test_pool(small_config());
        pool.initialize().await.unwrap();
        pool.initialize().await.unwrap();

        assert_eq!(pool.stats().total_connections, 2);
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_initialize_skips_individual_failures() {
        let config = PoolConfig {
            min_connections: 3,
            max_connections: 4,
            ..Default::default()
        };
        let (pool, factory) = test_pool(config);
        factory.fail_next.store(1, Ordering::SeqCst);

        pool.initialize().await.unwrap();

        // One creation failed and was skipped, the pool starts short
        let stats = pool.stats();
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.circuit.total_failures, 1);
    }

    #[tokio::test]
    async fn test_initialize_fails_when_nothing_creates() {
        let (pool, factory) = test_pool(small_config());
        factory.fail_creates.store(true, Ordering::SeqCst);

        let err = pool.initialize().await.unwrap_err();
        assert!(matches!(err, PoolError::ConnectionCreateFailed(_)));

        // A later call may still succeed once the endpoint is back
        factory.fail_creates.store(false, Ordering::SeqCst);
        pool.initialize().await.unwrap();
        assert_eq!(pool.stats().total_connections, 2);
    }

    #[tokio::test]
    async fn test_acquire_release_cycle() {
        let (pool, _) = test_pool(small_config());
        pool.initialize().await.unwrap();

        let conn = pool.acquire().await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.busy_connections, 1);
        assert_eq!(stats.idle_connections, 1);

        pool.release(conn.id, RequestOutcome::Success { latency_ms: 12.0 })
            .await;
        let stats = pool.stats();
        assert_eq!(stats.busy_connections, 0);
        assert_eq!(stats.idle_connections, 2);
        assert_eq!(stats.total_reused, 1);
    }

    #[tokio::test]
    async fn test_grows_to_max_then_exhausts() {
        let (pool, _) = test_pool(small_config());
        pool.initialize().await.unwrap();

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let c = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().total_connections, 3);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::PoolExhausted(_)));

        for conn in [a, b, c] {
            pool.release(conn.id, RequestOutcome::Success { latency_ms: 5.0 })
                .await;
        }
    }

    #[tokio::test]
    async fn test_waiting_acquire_served_by_release() {
        let config = PoolConfig {
            min_connections: 1,
            max_connections: 1,
            acquire_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let (pool, _) = test_pool(config);
        pool.initialize().await.unwrap();

        let held = pool.acquire().await.unwrap();
        let held_id = held.id;

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.release(held_id, RequestOutcome::Success { latency_ms: 3.0 })
            .await;

        let conn = waiter.await.unwrap().unwrap();
        assert_eq!(conn.id, held_id);
        pool.release(conn.id, RequestOutcome::Success { latency_ms: 3.0 })
            .await;
    }

    #[tokio::test]
    async fn test_create_failure_surfaces_and_trips_breaker() {
        let config = PoolConfig {
            min_connections: 0,
            max_connections: 2,
            circuit: CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(30),
                half_open_max_calls: 1,
            },
            ..small_config()
        };
        let (pool, factory) = test_pool(config);
        pool.initialize().await.unwrap();
        factory.fail_creates.store(true, Ordering::SeqCst);

        for _ in 0..2 {
            let err = pool.acquire().await.unwrap_err();
            assert!(matches!(err, PoolError::ConnectionCreateFailed(_)));
        }

        // Breaker is now open
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::CircuitOpen(_)));
    }

    #[tokio::test]
    async fn test_failed_connection_not_handed_out() {
        let config = PoolConfig {
            min_connections: 1,
            max_connections: 1,
            acquire_timeout: Duration::from_millis(100),
            failed_after: 1,
            ..Default::default()
        };
        let (pool, _) = test_pool(config);
        pool.initialize().await.unwrap();

        let conn = pool.acquire().await.unwrap();
        pool.release(conn.id, RequestOutcome::Failure).await;

        // Sole connection is Failed and at max, acquire must time out
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::PoolExhausted(_)));
        assert_eq!(pool.stats().idle_connections, 1);
    }

    #[tokio::test]
    async fn test_shutdown_destroys_idle_and_rejects_acquires() {
        let (pool, factory) = test_pool(small_config());
        pool.initialize().await.unwrap();

        pool.shutdown().await;
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats().total_connections, 0);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::ShutDown));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_busy_release() {
        let config = PoolConfig {
            min_connections: 1,
            max_connections: 1,
            shutdown_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let (pool, factory) = test_pool(config);
        pool.initialize().await.unwrap();

        let conn = pool.acquire().await.unwrap();
        let releaser = {
            let pool = pool.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                pool.release(conn.id, RequestOutcome::Success { latency_ms: 1.0 })
                    .await;
            })
        };

        pool.shutdown().await;
        releaser.await.unwrap();
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().busy_connections, 0);
    }

    #[tokio::test]
    async fn test_probe_outcome_heals_failed_record() {
        let config = PoolConfig {
            min_connections: 1,
            max_connections: 1,
            failed_after: 1,
            ..Default::default()
        };
        let (pool, _) = test_pool(config);
        pool.initialize().await.unwrap();

        let conn = pool.acquire().await.unwrap();
        let id = conn.id;
        pool.release(id, RequestOutcome::Failure).await;

        pool.apply_probe_outcome(id, true, 5);
        pool.apply_probe_outcome(id, true, 5);

        // Two successful probes walk Failed back to Healthy
        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id, id);
        pool.release(id, RequestOutcome::Success { latency_ms: 2.0 })
            .await;
    }

    #[tokio::test]
    async fn test_sweep_retires_terminal_failures() {
        let config = PoolConfig {
            min_connections: 1,
            max_connections: 2,
            failed_after: 1,
            ..Default::default()
        };
        let (pool, factory) = test_pool(config);
        pool.initialize().await.unwrap();

        let conn = pool.acquire().await.unwrap();
        let id = conn.id;
        pool.release(id, RequestOutcome::Failure).await;

        // Failed -> Recovering, then fail again to run up recovery attempts
        pool.apply_probe_outcome(id, true, 5);
        for _ in 0..5 {
            pool.apply_probe_outcome(id, false, 5);
        }

        let handles = pool.sweep_retirable(Duration::from_secs(300), 1);
        assert_eq!(handles.len(), 1);
        for handle in handles {
            pool.factory().destroy(handle).await;
        }
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().total_connections, 0);
    }
}
