//! Poolwatch Core - Endpoint abstractions for a pool of interchangeable data sources
//!
//! This crate provides:
//! - The registry, endpoint, driver and connection traits the health monitor probes through
//! - Error types with miette diagnostics
//! - A random-selection registry with a blacklist
//! - A TCP endpoint kind and declarative endpoint definitions

pub mod error;
pub mod selector;
pub mod tcp;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use error::{PoolError, Result};
pub use selector::RandomSelector;
pub use tcp::{TcpDriver, TcpEndpoint, UnmanagedEndpoint};
pub use traits::{Connection, Driver, Endpoint, EndpointRegistry, ProbeTarget};
pub use types::{ConnectProperties, EndpointKind, EndpointSpec};

use std::collections::HashSet;
use std::path::Path;

/// Deserialize a value from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        PoolError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Load and validate a YAML endpoints file
pub fn load_endpoints_file(path: &Path) -> Result<Vec<EndpointSpec>> {
    let data = std::fs::read_to_string(path).map_err(|e| {
        PoolError::invalid_config(
            format!("Failed to read endpoints file '{}': {}", path.display(), e),
            "Check that the file exists and is readable",
        )
    })?;

    let specs: Vec<EndpointSpec> = from_yaml(&data)?;
    check_unique(&specs)?;
    Ok(specs)
}

/// Validate every definition and reject duplicate names
pub fn check_unique(specs: &[EndpointSpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for spec in specs {
        spec.validate()?;
        if !seen.insert(spec.name.as_str()) {
            return Err(PoolError::invalid_endpoint(&spec.name, "duplicate name"));
        }
    }
    Ok(())
}
