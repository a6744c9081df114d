use poolwatch_core::ProbeTarget;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Outcome of a single probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure(String),
}

/// Result of a probe with timing metadata
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub outcome: ProbeOutcome,
    pub duration: Duration,
}

impl ProbeResult {
    /// Failure that never reached the endpoint
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            outcome: ProbeOutcome::Failure(message.into()),
            duration: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ProbeOutcome::Success
    }
}

/// Runs one liveness check against an endpoint: open a connection, validate
/// it, release it
#[derive(Debug, Clone)]
pub struct ProbeExecutor {
    timeout: Duration,
}

impl ProbeExecutor {
    /// `timeout` bounds connect, validate and close separately.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn check(&self, name: &str, target: &dyn ProbeTarget) -> ProbeResult {
        let start = Instant::now();
        debug!("Validating endpoint {} at {}", name, target.address());

        let driver = target.driver();
        let connect = driver.connect(target.address(), target.connect_properties());
        let mut conn = match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return self.failed(name, start, e.to_string()),
            Err(_) => {
                return self.failed(
                    name,
                    start,
                    format!("connect timed out after {}ms", self.timeout.as_millis()),
                )
            }
        };

        let validated =
            tokio::time::timeout(self.timeout, target.validate_connection(conn.as_mut())).await;

        // The verdict is settled before release; a close failure never changes it
        match tokio::time::timeout(self.timeout, conn.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Can not close probe connection for {}: {}", name, e),
            Err(_) => error!(
                "Can not close probe connection for {}: timed out after {}ms",
                name,
                self.timeout.as_millis()
            ),
        }

        match validated {
            Ok(Ok(())) => ProbeResult {
                outcome: ProbeOutcome::Success,
                duration: start.elapsed(),
            },
            Ok(Err(e)) => self.failed(name, start, e.to_string()),
            Err(_) => self.failed(
                name,
                start,
                format!("validation timed out after {}ms", self.timeout.as_millis()),
            ),
        }
    }

    fn failed(&self, name: &str, start: Instant, message: String) -> ProbeResult {
        warn!("Validation FAILED for {}: {}", name, message);
        ProbeResult {
            outcome: ProbeOutcome::Failure(message),
            duration: start.elapsed(),
        }
    }
}
