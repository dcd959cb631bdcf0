//! inferpool - Adaptive connection pool for remote inference endpoints

pub mod config;
pub mod endpoint;
pub mod health;
pub mod lb;
pub mod pool;

pub use config::Config;
pub use endpoint::{ConnectionFactory, ConnectionProbe};
pub use health::{HealthCheckConfig, HealthMonitor};
pub use lb::{LoadBalancer, Strategy};
pub use pool::{
    ConnectionPoolManager, PoolConfig, PoolError, PoolStats, PooledConnection, RequestOutcome,
};
