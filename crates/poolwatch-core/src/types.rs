use crate::error::{PoolError, Result};
use crate::tcp::{TcpEndpoint, UnmanagedEndpoint};
use crate::traits::Endpoint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Property controlling how long a driver waits for a connection to open
pub const CONNECT_TIMEOUT_MS: &str = "connect_timeout_ms";
/// Property controlling how long validation waits for a reply
pub const VALIDATION_TIMEOUT_MS: &str = "validation_timeout_ms";
/// Statement sent during validation
pub const VALIDATION_QUERY: &str = "validation_query";

/// Connection properties handed to a driver
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectProperties(BTreeMap<String, String>);

impl ConnectProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Read a numeric property, falling back to `default` when it is missing
    /// or does not parse
    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Which endpoint implementation a definition builds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// Probed over a raw TCP connection
    #[default]
    Tcp,
    /// Routable but never probed
    Unmanaged,
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointKind::Tcp => write!(f, "tcp"),
            EndpointKind::Unmanaged => write!(f, "unmanaged"),
        }
    }
}

/// Declarative endpoint definition, as read from the command line or an
/// endpoints file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub kind: EndpointKind,
    #[serde(default, skip_serializing_if = "ConnectProperties::is_empty")]
    pub properties: ConnectProperties,
}

impl EndpointSpec {
    /// Parse the `name=host:port` shorthand
    pub fn parse(s: &str) -> Result<Self> {
        let (name, address) = s
            .split_once('=')
            .ok_or_else(|| PoolError::invalid_endpoint(s, "expected name=host:port"))?;

        let spec = Self {
            name: name.trim().to_string(),
            address: address.trim().to_string(),
            kind: EndpointKind::Tcp,
            properties: ConnectProperties::new(),
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(PoolError::invalid_endpoint(
                &self.name,
                "name must not be empty",
            ));
        }
        if self.address.is_empty() {
            return Err(PoolError::invalid_endpoint(
                &self.name,
                "address must not be empty",
            ));
        }
        if self.kind == EndpointKind::Tcp && !self.address.contains(':') {
            return Err(PoolError::invalid_endpoint(
                &self.name,
                format!("address '{}' has no port", self.address),
            ));
        }
        Ok(())
    }

    /// Build the endpoint this definition describes
    pub fn build(&self) -> Arc<dyn Endpoint> {
        match self.kind {
            EndpointKind::Tcp => Arc::new(TcpEndpoint::new(
                self.address.clone(),
                self.properties.clone(),
            )),
            EndpointKind::Unmanaged => Arc::new(UnmanagedEndpoint::new(self.address.clone())),
        }
    }
}
