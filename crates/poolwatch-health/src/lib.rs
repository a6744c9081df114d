//! Poolwatch Health - Background probing and blacklist maintenance
//!
//! This crate provides:
//! - A periodic monitor that probes every registered endpoint
//! - Consecutive-failure tracking and blacklist reconciliation
//! - A probe executor that always releases the probe connection
//! - Scripted mocks for testing against a fake registry

pub mod error;
pub mod executor;
pub mod mock;
pub mod monitor;
pub mod tracker;

// Re-export primary types
pub use error::{HealthError, Result};
pub use executor::{ProbeExecutor, ProbeOutcome, ProbeResult};
pub use mock::{BlacklistCall, MockEndpoint, MockOutcome, MockRegistry};
pub use monitor::{BlacklistMonitor, MonitorConfig, Pause, RoundReport, WakeHandle};
pub use tracker::{BlacklistAction, FailureTracker};
