use crate::error::Result;
use crate::types::ConnectProperties;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// An open connection to an endpoint
///
/// Connections are owned by whoever opened them and must be released with
/// `close()`. Closing twice is allowed and the second call is a no-op.
#[async_trait]
pub trait Connection: Send {
    /// Send one statement and return the first line of the reply
    async fn query(&mut self, statement: &str) -> Result<String>;

    /// Check the connection is still usable without sending anything
    async fn is_valid(&mut self) -> Result<()>;

    /// Release the connection
    async fn close(&mut self) -> Result<()>;
}

/// Connection factory for one kind of endpoint
#[async_trait]
pub trait Driver: Send + Sync {
    async fn connect(
        &self,
        address: &str,
        properties: &ConnectProperties,
    ) -> Result<Box<dyn Connection>>;
}

/// The parts of an endpoint a health probe needs
///
/// Only endpoints that know how to open and validate a raw connection
/// implement this. The probe opens exactly one connection through `driver()`,
/// hands it to `validate_connection()` and closes it afterwards.
#[async_trait]
pub trait ProbeTarget: Send + Sync {
    /// Raw driver used to open probe connections
    fn driver(&self) -> Arc<dyn Driver>;

    /// Properties passed to the driver on connect
    fn connect_properties(&self) -> &ConnectProperties;

    /// Raw address of the endpoint
    fn address(&self) -> &str;

    /// Fail with an error if the connection is not usable
    async fn validate_connection(&self, conn: &mut dyn Connection) -> Result<()>;
}

/// A data source the selection layer can route to
pub trait Endpoint: Send + Sync {
    /// Address shown in logs
    fn address(&self) -> &str;

    /// Probe view of this endpoint, or `None` for kinds the health monitor
    /// cannot check
    fn probe_target(&self) -> Option<&dyn ProbeTarget> {
        None
    }
}

/// Trait for the registry that owns endpoints and their blacklist
///
/// Implementations are shared between the health monitor and the selection
/// layer, so every method must be safe to call concurrently. Blacklist
/// mutations are keyed by endpoint name and are idempotent. Adding a name
/// that is already blacklisted or unknown to the registry is a no-op.
/// Removing a name that is not blacklisted is a no-op, and removing a name
/// that is no longer registered still drops any membership it left behind.
#[async_trait]
pub trait EndpointRegistry: Send + Sync {
    /// Snapshot of the currently registered endpoints
    async fn endpoint_map(&self) -> HashMap<String, Arc<dyn Endpoint>>;

    /// Exclude an endpoint from selection
    async fn add_blacklist(&self, name: &str);

    /// Make an endpoint selectable again
    async fn remove_blacklist(&self, name: &str);
}
