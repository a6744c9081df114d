// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Error type for the health monitor
#[derive(Error, Debug, Diagnostic)]
pub enum HealthError {
    /// Invalid monitor configuration
    #[error("Invalid monitor configuration: {message}")]
    #[diagnostic(code(poolwatch::health::invalid_config), help("{suggestion}"))]
    InvalidConfig {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },
}

/// Result type alias for health monitor operations
pub type Result<T> = std::result::Result<T, HealthError>;

impl HealthError {
    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }
}
