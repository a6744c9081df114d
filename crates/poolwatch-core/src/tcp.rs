use crate::error::{PoolError, Result};
use crate::traits::{Connection, Driver, Endpoint, ProbeTarget};
use crate::types::{ConnectProperties, CONNECT_TIMEOUT_MS, VALIDATION_QUERY, VALIDATION_TIMEOUT_MS};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;
const DEFAULT_VALIDATION_TIMEOUT_MS: u64 = 3000;

/// Driver that opens plain TCP connections
#[derive(Debug, Default)]
pub struct TcpDriver;

#[async_trait]
impl Driver for TcpDriver {
    async fn connect(
        &self,
        address: &str,
        properties: &ConnectProperties,
    ) -> Result<Box<dyn Connection>> {
        let connect_timeout = Duration::from_millis(
            properties.get_u64(CONNECT_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS),
        );
        let io_timeout = Duration::from_millis(
            properties.get_u64(VALIDATION_TIMEOUT_MS, DEFAULT_VALIDATION_TIMEOUT_MS),
        );

        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(address)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(PoolError::connect_failed(
                    address,
                    e.to_string(),
                    Some(Box::new(e)),
                ))
            }
            Err(_) => {
                return Err(PoolError::connect_failed(
                    address,
                    format!("timed out after {}ms", connect_timeout.as_millis()),
                    None,
                ))
            }
        };

        debug!("Opened TCP connection to {}", address);
        Ok(Box::new(TcpConnection {
            address: address.to_string(),
            stream: Some(BufReader::new(stream)),
            io_timeout,
        }))
    }
}

/// Line-oriented TCP connection
pub struct TcpConnection {
    address: String,
    stream: Option<BufReader<TcpStream>>,
    io_timeout: Duration,
}

impl TcpConnection {
    fn stream(&mut self) -> Result<&mut BufReader<TcpStream>> {
        let address = &self.address;
        self.stream
            .as_mut()
            .ok_or_else(|| PoolError::validation_failed(address, "connection already closed"))
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn query(&mut self, statement: &str) -> Result<String> {
        let io_timeout = self.io_timeout;
        let address = self.address.clone();
        let stream = self.stream()?;

        let exchange = async {
            stream.get_mut().write_all(statement.as_bytes()).await?;
            stream.get_mut().write_all(b"\n").await?;
            stream.get_mut().flush().await?;
            let mut line = String::new();
            stream.read_line(&mut line).await?;
            Ok::<_, std::io::Error>(line)
        };

        match tokio::time::timeout(io_timeout, exchange).await {
            Ok(Ok(line)) => Ok(line.trim_end().to_string()),
            Ok(Err(e)) => Err(PoolError::validation_failed(
                address,
                format!("query failed: {}", e),
            )),
            Err(_) => Err(PoolError::validation_failed(
                address,
                format!("no reply within {}ms", io_timeout.as_millis()),
            )),
        }
    }

    async fn is_valid(&mut self) -> Result<()> {
        let address = self.address.clone();
        let stream = self.stream()?;
        stream
            .get_ref()
            .peer_addr()
            .map(|_| ())
            .map_err(|e| PoolError::validation_failed(address, e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        stream
            .get_mut()
            .shutdown()
            .await
            .map_err(|e| PoolError::close_failed(&self.address, e.to_string()))
    }
}

/// Endpoint reachable over TCP, probed by opening a connection and
/// optionally exchanging a validation query
pub struct TcpEndpoint {
    address: String,
    properties: ConnectProperties,
    driver: Arc<dyn Driver>,
}

impl TcpEndpoint {
    pub fn new(address: impl Into<String>, properties: ConnectProperties) -> Self {
        Self {
            address: address.into(),
            properties,
            driver: Arc::new(TcpDriver),
        }
    }
}

impl Endpoint for TcpEndpoint {
    fn address(&self) -> &str {
        &self.address
    }

    fn probe_target(&self) -> Option<&dyn ProbeTarget> {
        Some(self)
    }
}

#[async_trait]
impl ProbeTarget for TcpEndpoint {
    fn driver(&self) -> Arc<dyn Driver> {
        self.driver.clone()
    }

    fn connect_properties(&self) -> &ConnectProperties {
        &self.properties
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn validate_connection(&self, conn: &mut dyn Connection) -> Result<()> {
        let Some(query) = self.properties.get(VALIDATION_QUERY) else {
            return conn.is_valid().await;
        };

        let reply = conn.query(query).await?;
        if reply.is_empty() {
            return Err(PoolError::validation_failed(
                &self.address,
                format!("empty reply to '{}'", query),
            ));
        }
        Ok(())
    }
}

/// Endpoint the health monitor leaves alone
#[derive(Debug)]
pub struct UnmanagedEndpoint {
    address: String,
}

impl UnmanagedEndpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl Endpoint for UnmanagedEndpoint {
    fn address(&self) -> &str {
        &self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn probe(endpoint: &TcpEndpoint) -> Result<()> {
        let target = endpoint.probe_target().unwrap();
        let mut conn = target
            .driver()
            .connect(target.address(), target.connect_properties())
            .await?;
        let result = target.validate_connection(conn.as_mut()).await;
        let _ = conn.close().await;
        result
    }

    #[tokio::test]
    async fn test_connect_and_validate_without_query() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            if let Ok((_stream, _)) = listener.accept().await {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        });

        let endpoint = TcpEndpoint::new(addr.to_string(), ConnectProperties::new());
        assert!(probe(&endpoint).await.is_ok());

        server.abort();
    }

    #[tokio::test]
    async fn test_validation_query_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                let mut reader = BufReader::new(stream);
                let mut line = String::new();
                let _ = reader.read_line(&mut line).await;
                if line.trim() == "PING" {
                    let _ = reader.get_mut().write_all(b"PONG\n").await;
                }
            }
        });

        let endpoint = TcpEndpoint::new(
            addr.to_string(),
            ConnectProperties::new().with(VALIDATION_QUERY, "PING"),
        );
        assert!(probe(&endpoint).await.is_ok());

        server.abort();
    }

    #[tokio::test]
    async fn test_validation_fails_when_peer_hangs_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 64];
                let _ = stream.read(&mut buf).await;
                // Close without replying
            }
        });

        let endpoint = TcpEndpoint::new(
            addr.to_string(),
            ConnectProperties::new()
                .with(VALIDATION_QUERY, "PING")
                .with(VALIDATION_TIMEOUT_MS, "2000"),
        );
        let err = probe(&endpoint).await.unwrap_err();
        assert!(matches!(err, PoolError::ValidationFailed { .. }));

        server.abort();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Use a port that is almost certainly not listening
        let endpoint = TcpEndpoint::new("127.0.0.1:1", ConnectProperties::new());
        let err = probe(&endpoint).await.unwrap_err();
        assert!(matches!(err, PoolError::ConnectFailed { .. }));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            if let Ok((_stream, _)) = listener.accept().await {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        });

        let mut conn = TcpDriver
            .connect(&addr.to_string(), &ConnectProperties::new())
            .await
            .unwrap();
        assert!(conn.close().await.is_ok());
        assert!(conn.close().await.is_ok());
        assert!(conn.is_valid().await.is_err());

        server.abort();
    }

    #[test]
    fn test_unmanaged_is_not_probeable() {
        let endpoint = UnmanagedEndpoint::new("archive-cluster");
        assert_eq!(Endpoint::address(&endpoint), "archive-cluster");
        assert!(endpoint.probe_target().is_none());
    }
}
