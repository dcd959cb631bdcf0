//! Example demonstrating connection pool and circuit breaker usage
//!
//! This example shows how to:
//! 1. Configure the pool, circuit breaker, and health monitor
//! 2. Acquire and release connections with request outcomes
//! 3. Watch the circuit open under a failure burst and recover
//! 4. Inspect pool and circuit statistics

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use inferpool::endpoint::EndpointError;
use inferpool::pool::CircuitBreakerConfig;
use inferpool::{
    ConnectionFactory, ConnectionProbe, ConnectionPoolManager, HealthCheckConfig, HealthMonitor,
    PoolConfig, RequestOutcome, Strategy,
};

/// Stand-in for a remote inference endpoint
struct SimEndpoint {
    healthy: AtomicBool,
    next_conn: AtomicU64,
}

#[derive(Clone)]
struct SimFactory(Arc<SimEndpoint>);

#[async_trait]
impl ConnectionFactory for SimFactory {
    type Handle = u64;

    async fn create(&self) -> Result<u64, EndpointError> {
        if self.0.healthy.load(Ordering::SeqCst) {
            Ok(self.0.next_conn.fetch_add(1, Ordering::SeqCst))
        } else {
            Err(EndpointError::ConnectFailed("endpoint down".to_string()))
        }
    }

    async fn destroy(&self, handle: u64) {
        info!(connection = handle, "closed connection");
    }
}

#[derive(Clone)]
struct SimProbe(Arc<SimEndpoint>);

#[async_trait]
impl ConnectionProbe<u64> for SimProbe {
    async fn check(&self, _handle: &u64, _timeout: Duration) -> Result<bool, EndpointError> {
        Ok(self.0.healthy.load(Ordering::SeqCst))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let endpoint = Arc::new(SimEndpoint {
        healthy: AtomicBool::new(true),
        next_conn: AtomicU64::new(1),
    });

    // Configure the pool
    let pool_config = PoolConfig {
        min_connections: 2,
        max_connections: 5,
        acquire_timeout: Duration::from_secs(1),
        degraded_after: 2,
        failed_after: 10,
        strategy: Strategy::WeightedRandom,
        circuit: CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(2),
            half_open_max_calls: 2,
        },
        ..Default::default()
    };

    // Create the pool and warm it to the minimum size
    let pool = ConnectionPoolManager::new(
        SimFactory(Arc::clone(&endpoint)),
        SimProbe(Arc::clone(&endpoint)),
        pool_config,
    );
    pool.initialize().await?;

    // Start the background health monitor
    let monitor_config = HealthCheckConfig {
        interval: Duration::from_millis(500),
        ..Default::default()
    };
    let monitor = HealthMonitor::new(pool.clone(), monitor_config).start();

    // Simulate a request workload with the occasional failure
    for i in 0..20 {
        match pool.acquire().await {
            Ok(conn) => {
                info!(request = i + 1, connection = conn.handle, "acquired");

                // In real code the handle would carry the request here

                if i % 7 == 3 {
                    warn!(request = i + 1, "request failed");
                    pool.release(conn.id, RequestOutcome::Failure).await;
                } else {
                    let latency_ms = 20.0 + (i % 5) as f64 * 5.0;
                    pool.release(conn.id, RequestOutcome::Success { latency_ms })
                        .await;
                }
            }
            Err(e) => {
                warn!(request = i + 1, error = %e, "acquire failed");
            }
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    print_stats(&pool);

    // Drive the circuit open with a failure burst
    println!("\n=== FAILURE BURST ===\n");
    for _ in 0..5 {
        if let Ok(conn) = pool.acquire().await {
            pool.release(conn.id, RequestOutcome::Failure).await;
        }
    }

    match pool.acquire().await {
        Ok(conn) => {
            info!(connection = conn.handle, "unexpected acquire while open");
            pool.release(conn.id, RequestOutcome::Success { latency_ms: 1.0 })
                .await;
        }
        Err(e) => warn!(error = %e, "circuit rejected the request"),
    }
    println!("circuit state: {}", pool.stats().circuit.state.name());

    // Wait out the recovery timeout, then close the circuit with a success
    println!("\n=== RECOVERY ===\n");
    info!("waiting for the recovery timeout");
    tokio::time::sleep(Duration::from_millis(2500)).await;

    match pool.acquire().await {
        Ok(conn) => {
            info!(connection = conn.handle, "trial request admitted");
            pool.release(conn.id, RequestOutcome::Success { latency_ms: 18.0 })
                .await;
        }
        Err(e) => warn!(error = %e, "trial request rejected"),
    }
    println!("circuit state: {}", pool.stats().circuit.state.name());

    print_stats(&pool);

    // Drain and stop
    pool.shutdown().await;
    let _ = monitor.await;

    Ok(())
}

fn print_stats(pool: &ConnectionPoolManager<SimFactory, SimProbe>) {
    let stats = pool.stats();

    println!("\n=== POOL STATISTICS ===\n");
    println!("Connections: {} total", stats.total_connections);
    println!("  Idle: {}", stats.idle_connections);
    println!("  Busy: {}", stats.busy_connections);
    println!("  Created: {}", stats.total_created);
    println!("  Retired: {}", stats.total_retired);
    println!("  Reused: {}", stats.total_reused);
    println!();

    for conn in &stats.connections {
        println!(
            "  #{} {} requests={} avg_rt={} err={:.0}%",
            conn.id,
            conn.state.name(),
            conn.requests_processed,
            conn.avg_response_time
                .map(|rt| format!("{rt:.1}ms"))
                .unwrap_or_else(|| "-".to_string()),
            conn.error_rate * 100.0
        );
    }

    let circuit = &stats.circuit;
    println!();
    println!("Circuit breaker:");
    println!("  State: {}", circuit.state.name());
    println!("  Total requests: {}", circuit.total_requests);
    println!("  Total successes: {}", circuit.total_successes);
    println!("  Total failures: {}", circuit.total_failures);
    println!("  Times opened: {}", circuit.open_count);
    println!("  Time in current state: {:?}", circuit.time_in_state);
}
