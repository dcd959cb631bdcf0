//! Endpoint integration seams
//!
//! The pool is generic over how connections to the remote endpoint are
//! created, destroyed, and probed. [`ConnectionFactory`] and
//! [`ConnectionProbe`] are the two seams; [`http`] provides the HTTP/2
//! implementation used against real inference endpoints, and tests plug
//! in mock implementations.

pub mod http;

use std::time::Duration;

use async_trait::async_trait;

pub use http::{HttpConnectionFactory, HttpEndpointConfig, HttpProbe};

/// Error types for endpoint operations
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("failed to connect to endpoint: {0}")]
    ConnectFailed(String),

    #[error("endpoint operation timed out")]
    Timeout,

    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("request error: {0}")]
    Request(#[from] hyper::http::Error),
}

/// Creates and tears down connections to the remote endpoint
///
/// The pool manager calls `create` when growing the pool and `destroy`
/// when retiring a connection. Both run outside the pool lock.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The connection handle stored in pool records
    ///
    /// Handles are cloned for callers and probes while the record keeps
    /// ownership, so they must be cheaply cloneable (HTTP/2 senders,
    /// channel handles, `Arc`-wrapped clients).
    type Handle: Clone + Send + Sync + 'static;

    /// Establish a new connection
    async fn create(&self) -> Result<Self::Handle, EndpointError>;

    /// Tear down a connection that is being retired
    async fn destroy(&self, handle: Self::Handle);
}

/// Checks whether an existing connection is still serviceable
///
/// `Ok(true)` means the probe round-tripped and the endpoint answered
/// acceptably. `Ok(false)` and `Err(_)` are both treated as probe
/// failures by the health monitor.
#[async_trait]
pub trait ConnectionProbe<H>: Send + Sync + 'static {
    async fn check(&self, handle: &H, timeout: Duration) -> Result<bool, EndpointError>;
}
