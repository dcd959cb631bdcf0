//! HTTP/2 endpoint adapter
//!
//! Implements the factory and probe seams for an inference endpoint
//! spoken to over HTTP/2. Connections are multiplexed senders; the
//! connection driver runs in a spawned task and the pooled handle is the
//! cloneable [`http2::SendRequest`] half.

use std::time::Duration;

use async_trait::async_trait;
use hyper::client::conn::http2;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::{ConnectionFactory, ConnectionProbe, EndpointError};

/// Settings for the HTTP/2 endpoint adapter
#[derive(Debug, Clone)]
pub struct HttpEndpointConfig {
    /// Endpoint base URL, e.g. `http://inference-1:8080`
    pub url: String,

    /// TCP connect timeout
    pub connect_timeout: Duration,

    /// Path probed for liveness, e.g. `/health`
    pub health_path: String,
}

impl Default for HttpEndpointConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            connect_timeout: Duration::from_secs(10),
            health_path: "/health".to_string(),
        }
    }
}

/// Creates HTTP/2 connections to the configured endpoint
pub struct HttpConnectionFactory {
    config: HttpEndpointConfig,
}

impl HttpConnectionFactory {
    pub fn new(config: HttpEndpointConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConnectionFactory for HttpConnectionFactory {
    type Handle = http2::SendRequest<String>;

    async fn create(&self) -> Result<Self::Handle, EndpointError> {
        let uri = self
            .config
            .url
            .parse::<hyper::Uri>()
            .map_err(|e| EndpointError::InvalidUrl(e.to_string()))?;

        let host = uri
            .host()
            .ok_or_else(|| EndpointError::InvalidUrl("no host in URL".to_string()))?;
        let port = uri.port_u16().unwrap_or(80);

        debug!(
            endpoint = %self.config.url,
            host = %host,
            port = %port,
            "creating new connection"
        );

        // Connect with timeout
        let addr = format!("{}:{}", host, port);
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| EndpointError::Timeout)?
            .map_err(|e| EndpointError::ConnectFailed(e.to_string()))?;

        // Configure TCP keep-alive
        let socket = socket2::Socket::from(stream.into_std()?);
        socket.set_keepalive(true)?;
        let stream = TcpStream::from_std(socket.into())?;

        // Build HTTP/2 connection
        let (sender, conn) = http2::handshake(TokioExecutor::new(), TokioIo::new(stream))
            .await
            .map_err(|e| EndpointError::ConnectFailed(e.to_string()))?;

        // Spawn connection driver task
        let endpoint = self.config.url.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                warn!(endpoint = %endpoint, error = %e, "HTTP/2 connection error");
            }
        });

        info!(endpoint = %self.config.url, "created new connection");

        Ok(sender)
    }

    async fn destroy(&self, handle: Self::Handle) {
        // Dropping the last sender clone lets the driver task wind the
        // connection down
        debug!(endpoint = %self.config.url, "destroying connection");
        drop(handle);
    }
}

/// Probes an HTTP/2 connection by issuing a GET to the health path
pub struct HttpProbe {
    config: HttpEndpointConfig,
}

impl HttpProbe {
    pub fn new(config: HttpEndpointConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConnectionProbe<http2::SendRequest<String>> for HttpProbe {
    async fn check(
        &self,
        handle: &http2::SendRequest<String>,
        timeout: Duration,
    ) -> Result<bool, EndpointError> {
        // The sender knows when its driver has shut down
        if handle.is_closed() {
            return Ok(false);
        }

        let url = url::Url::parse(&self.config.url)
            .map_err(|e| EndpointError::InvalidUrl(e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| EndpointError::InvalidUrl("no host in URL".to_string()))?
            .to_string();

        let uri = format!("{}{}", self.config.url, self.config.health_path);
        let req = Request::builder()
            .method("GET")
            .uri(uri)
            .header("Host", host)
            .body(String::new())?;

        let mut sender = handle.clone();
        let response = match tokio::time::timeout(timeout, sender.send_request(req)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Err(EndpointError::Http(e)),
            Err(_) => return Err(EndpointError::Timeout),
        };

        let status = response.status();
        debug!(status = %status, "health probe response");

        // A 4xx still proves the connection and endpoint are alive
        Ok(!status.is_server_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = HttpEndpointConfig::default();
        assert_eq!(config.url, "http://localhost:8080");
        assert_eq!(config.health_path, "/health");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_create_fails_for_unroutable_endpoint() {
        let factory = HttpConnectionFactory::new(HttpEndpointConfig {
            url: "http://127.0.0.1:1".to_string(),
            connect_timeout: Duration::from_millis(200),
            health_path: "/health".to_string(),
        });

        let result = factory.create().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_create_rejects_malformed_url() {
        let factory = HttpConnectionFactory::new(HttpEndpointConfig {
            url: "not a url".to_string(),
            ..Default::default()
        });

        assert!(matches!(
            factory.create().await,
            Err(EndpointError::InvalidUrl(_))
        ));
    }
}
