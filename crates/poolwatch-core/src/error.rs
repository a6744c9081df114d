// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for endpoint and connection operations
#[derive(Error, Debug, Diagnostic)]
pub enum PoolError {
    /// Opening a connection to the endpoint failed
    #[error("Failed to connect to {address}: {message}")]
    #[diagnostic(
        code(poolwatch::connect_failed),
        help("Verify the endpoint is running and reachable from this host, and that connect_timeout_ms is large enough")
    )]
    ConnectFailed {
        #[allow(unused)]
        address: String,
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The connection was opened but did not pass validation
    #[error("Connection to {address} failed validation: {message}")]
    #[diagnostic(
        code(poolwatch::validation_failed),
        help("Check the validation_query property and that the endpoint answers it")
    )]
    ValidationFailed {
        #[allow(unused)]
        address: String,
        #[allow(unused)]
        message: String,
    },

    /// Releasing a connection failed
    #[error("Failed to close connection to {address}: {message}")]
    #[diagnostic(
        code(poolwatch::close_failed),
        help("The connection may already have been reset by the peer")
    )]
    CloseFailed {
        #[allow(unused)]
        address: String,
        #[allow(unused)]
        message: String,
    },

    /// Endpoint definition is not usable
    #[error("Invalid endpoint '{name}': {reason}")]
    #[diagnostic(
        code(poolwatch::invalid_endpoint),
        help("Endpoints are written as name=host:port, and names must be non-empty and unique")
    )]
    InvalidEndpoint {
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        reason: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(poolwatch::invalid_config), help("{suggestion}"))]
    InvalidConfig {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(poolwatch::serialization_error),
        help("Ensure the endpoints file is a YAML list of entries with name, address, kind and properties")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for poolwatch core operations
pub type Result<T> = std::result::Result<T, PoolError>;

impl PoolError {
    /// Create a ConnectFailed error
    pub fn connect_failed(
        address: impl Into<String>,
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::ConnectFailed {
            address: address.into(),
            message: message.into(),
            source,
        }
    }

    /// Create a ValidationFailed error
    pub fn validation_failed(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Create a CloseFailed error
    pub fn close_failed(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CloseFailed {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Create an InvalidEndpoint error
    pub fn invalid_endpoint(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidConfig error
    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }
}
