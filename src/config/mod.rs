use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::endpoint::HttpEndpointConfig;
use crate::health::HealthCheckConfig;
use crate::lb::Strategy;
use crate::pool::{CircuitBreakerConfig, PoolConfig};

/// Remote endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSettings {
    /// Endpoint base URL, e.g. `http://inference-1:8080`
    pub url: String,

    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Path probed for liveness
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_health_path() -> String {
    "/health".to_string()
}

/// Pool sizing and admission settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Connections created at startup and kept through retirement
    #[serde(default = "default_min_connections")]
    pub min_connections: usize,

    /// Hard cap on live connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// How long an acquire may wait, in seconds
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// How long shutdown drains busy connections, in seconds
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Consecutive failures before a connection is Degraded
    #[serde(default = "default_degraded_after")]
    pub degraded_after: u32,

    /// Consecutive failures before a connection is Failed
    #[serde(default = "default_failed_after")]
    pub failed_after: u32,

    /// Selection strategy: weighted_random or round_robin
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

fn default_min_connections() -> usize {
    2
}

fn default_max_connections() -> usize {
    10
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_degraded_after() -> u32 {
    1
}

fn default_failed_after() -> u32 {
    3
}

fn default_strategy() -> String {
    "weighted_random".to_string()
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            degraded_after: default_degraded_after(),
            failed_after: default_failed_after(),
            strategy: default_strategy(),
        }
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Accumulated failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds the circuit stays Open before testing recovery
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,

    /// Requests admitted while HalfOpen
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_secs() -> u64 {
    30
}

fn default_half_open_max_calls() -> u32 {
    3
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

/// Health monitoring settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckSettings {
    /// Whether the background monitor runs
    #[serde(default = "default_health_enabled")]
    pub enabled: bool,

    /// Seconds between probe cycles
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,

    /// Timeout for a single probe, in seconds
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Consecutive probe failures before a connection is Failed
    #[serde(default = "default_monitor_failure_threshold")]
    pub failure_threshold: u32,

    /// Failed recoveries before a connection is retired for good
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,

    /// Seconds of idleness after which surplus connections retire
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,
}

fn default_health_enabled() -> bool {
    true
}

fn default_health_interval_secs() -> u64 {
    30
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_monitor_failure_threshold() -> u32 {
    5
}

fn default_max_recovery_attempts() -> u32 {
    3
}

fn default_max_idle_secs() -> u64 {
    300
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            enabled: default_health_enabled(),
            interval_secs: default_health_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            failure_threshold: default_monitor_failure_threshold(),
            max_recovery_attempts: default_max_recovery_attempts(),
            max_idle_secs: default_max_idle_secs(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Remote endpoint settings
    pub endpoint: EndpointSettings,

    /// Pool settings
    #[serde(default)]
    pub pool: PoolSettings,

    /// Circuit breaker settings
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Health monitoring settings
    #[serde(default)]
    pub health_check: HealthCheckSettings,
}

impl Config {
    /// Build the core pool configuration consumed by the manager
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_connections: self.pool.min_connections,
            max_connections: self.pool.max_connections,
            acquire_timeout: Duration::from_secs(self.pool.acquire_timeout_secs),
            shutdown_timeout: Duration::from_secs(self.pool.shutdown_timeout_secs),
            degraded_after: self.pool.degraded_after,
            failed_after: self.pool.failed_after,
            strategy: self.strategy(),
            circuit: CircuitBreakerConfig {
                failure_threshold: self.circuit_breaker.failure_threshold,
                recovery_timeout: Duration::from_secs(self.circuit_breaker.recovery_timeout_secs),
                half_open_max_calls: self.circuit_breaker.half_open_max_calls,
            },
        }
    }

    /// Build the health monitor configuration
    pub fn health_config(&self) -> HealthCheckConfig {
        HealthCheckConfig {
            enabled: self.health_check.enabled,
            interval: Duration::from_secs(self.health_check.interval_secs),
            probe_timeout: Duration::from_secs(self.health_check.probe_timeout_secs),
            failure_threshold: self.health_check.failure_threshold,
            max_recovery_attempts: self.health_check.max_recovery_attempts,
            max_idle_time: Duration::from_secs(self.health_check.max_idle_secs),
        }
    }

    /// Build the HTTP endpoint adapter configuration
    pub fn endpoint_config(&self) -> HttpEndpointConfig {
        HttpEndpointConfig {
            url: self.endpoint.url.clone(),
            connect_timeout: Duration::from_secs(self.endpoint.connect_timeout_secs),
            health_path: self.endpoint.health_path.clone(),
        }
    }

    fn strategy(&self) -> Strategy {
        match self.pool.strategy.as_str() {
            "round_robin" => Strategy::RoundRobin,
            "weighted_random" => Strategy::WeightedRandom,
            other => {
                warn!(strategy = %other, "unknown strategy, using weighted_random");
                Strategy::WeightedRandom
            }
        }
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    Ok(config)
}

/// Load configuration from environment variables
///
/// Supported variables:
/// - INFERPOOL_ENDPOINT (required, endpoint base URL)
/// - INFERPOOL_HEALTH_PATH (optional, defaults to /health)
/// - INFERPOOL_MIN_CONNECTIONS / INFERPOOL_MAX_CONNECTIONS
/// - INFERPOOL_ACQUIRE_TIMEOUT_SECS
/// - INFERPOOL_STRATEGY (weighted_random or round_robin)
/// - INFERPOOL_PROBE_INTERVAL_SECS
/// - INFERPOOL_FAILURE_THRESHOLD (circuit breaker)
pub fn load_from_env() -> Result<Config> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let url = std::env::var("INFERPOOL_ENDPOINT")
        .context("INFERPOOL_ENDPOINT environment variable not set")?;

    let mut config = Config {
        endpoint: EndpointSettings {
            url,
            connect_timeout_secs: default_connect_timeout_secs(),
            health_path: default_health_path(),
        },
        pool: PoolSettings::default(),
        circuit_breaker: CircuitBreakerSettings::default(),
        health_check: HealthCheckSettings::default(),
    };

    if let Ok(path) = std::env::var("INFERPOOL_HEALTH_PATH") {
        config.endpoint.health_path = path;
    }

    if let Ok(min) = std::env::var("INFERPOOL_MIN_CONNECTIONS") {
        if let Ok(val) = min.parse() {
            config.pool.min_connections = val;
        }
    }

    if let Ok(max) = std::env::var("INFERPOOL_MAX_CONNECTIONS") {
        if let Ok(val) = max.parse() {
            config.pool.max_connections = val;
        }
    }

    if let Ok(timeout) = std::env::var("INFERPOOL_ACQUIRE_TIMEOUT_SECS") {
        if let Ok(val) = timeout.parse() {
            config.pool.acquire_timeout_secs = val;
        }
    }

    if let Ok(strategy) = std::env::var("INFERPOOL_STRATEGY") {
        config.pool.strategy = strategy;
    }

    if let Ok(interval) = std::env::var("INFERPOOL_PROBE_INTERVAL_SECS") {
        if let Ok(val) = interval.parse() {
            config.health_check.interval_secs = val;
        }
    }

    if let Ok(threshold) = std::env::var("INFERPOOL_FAILURE_THRESHOLD") {
        if let Ok(val) = threshold.parse() {
            config.circuit_breaker.failure_threshold = val;
        }
    }

    Ok(config)
}

/// Load configuration from file or environment
///
/// Tries the YAML file when a path is given, otherwise falls back to
/// environment variables.
pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    if let Some(path) = config_path {
        load_from_yaml(path)
    } else {
        load_from_env()
    }
}
