//! Background health monitoring
//!
//! The [`HealthMonitor`] probes idle connections on an interval, repairs
//! their state machines from the probe outcomes, and retires connections
//! that are terminally failed or stale. Busy connections are never
//! probed; their health is judged by real request outcomes at release
//! time. The monitor never creates connections, growth stays with the
//! acquire path.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::endpoint::{ConnectionFactory, ConnectionProbe};
use crate::pool::ConnectionPoolManager;

/// Configuration for health monitoring
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Whether the monitor runs at all
    pub enabled: bool,

    /// Interval between probe cycles
    pub interval: Duration,

    /// Timeout for a single probe
    pub probe_timeout: Duration,

    /// Consecutive probe failures before a connection is marked Failed
    pub failure_threshold: u32,

    /// Failed recoveries before a connection is retired for good
    pub max_recovery_attempts: u32,

    /// Idle time after which a connection above the minimum is retired
    pub max_idle_time: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            failure_threshold: 5,
            max_recovery_attempts: 3,
            max_idle_time: Duration::from_secs(300),
        }
    }
}

/// Probes idle pool connections and applies the results
pub struct HealthMonitor<F: ConnectionFactory, P> {
    pool: ConnectionPoolManager<F, P>,
    config: HealthCheckConfig,
}

impl<F, P> HealthMonitor<F, P>
where
    F: ConnectionFactory,
    P: ConnectionProbe<F::Handle>,
{
    pub fn new(pool: ConnectionPoolManager<F, P>, config: HealthCheckConfig) -> Self {
        Self { pool, config }
    }

    /// Start the monitoring background task
    ///
    /// The task runs probe cycles until the pool shuts down.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if !self.config.enabled {
                info!("health monitor disabled");
                return;
            }

            let mut shutdown = self.pool.shutdown_signal();
            if *shutdown.borrow() {
                return;
            }

            info!(
                interval_secs = self.config.interval.as_secs(),
                "health monitor started"
            );

            let mut ticker = tokio::time::interval(self.config.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let start = Instant::now();
                        self.run_cycle().await;
                        debug!(
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "probe cycle completed"
                        );
                    }
                    _ = shutdown.changed() => {
                        info!("health monitor stopping");
                        break;
                    }
                }
            }
        })
    }

    /// One probe cycle: fan out over idle connections, fold results back,
    /// then run the retirement sweep
    async fn run_cycle(&self) {
        let targets = self.pool.probe_targets();

        let mut tasks = Vec::with_capacity(targets.len());
        for (id, handle) in targets {
            let probe = self.pool.probe();
            let timeout = self.config.probe_timeout;

            tasks.push(tokio::spawn(async move {
                let ok = match tokio::time::timeout(timeout, probe.check(&handle, timeout)).await {
                    Ok(Ok(healthy)) => healthy,
                    Ok(Err(e)) => {
                        debug!(connection_id = id, error = %e, "probe error");
                        false
                    }
                    Err(_) => {
                        debug!(connection_id = id, "probe timed out");
                        false
                    }
                };
                (id, ok)
            }));
        }

        for task in tasks {
            if let Ok((id, ok)) = task.await {
                self.pool
                    .apply_probe_outcome(id, ok, self.config.failure_threshold);
            }
        }

        let retired = self
            .pool
            .sweep_retirable(self.config.max_idle_time, self.config.max_recovery_attempts);
        if !retired.is_empty() {
            debug!(count = retired.len(), "destroying retired connections");
        }
        let factory = self.pool.factory();
        for handle in retired {
            factory.destroy(handle).await;
        }
    }
}
