use crate::error::{HealthError, Result};
use crate::executor::{ProbeExecutor, ProbeResult};
use crate::tracker::{BlacklistAction, FailureTracker};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use futures_util::FutureExt;
use poolwatch_core::{Endpoint, EndpointRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for the blacklist monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Seconds to sleep between rounds
    pub sleep_seconds: u64,
    /// Consecutive failures before an endpoint is blacklisted
    pub blacklist_threshold: u32,
    /// Probes allowed in flight at once within a round (1 = sequential)
    pub max_concurrent_probes: usize,
    /// Upper bound for each step of a single probe
    pub probe_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sleep_seconds: 30,
            blacklist_threshold: 3,
            max_concurrent_probes: 1,
            probe_timeout: Duration::from_secs(10),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sleep_seconds == 0 {
            return Err(HealthError::invalid_config(
                "sleep_seconds must be greater than zero",
                "Use at least 1 second between rounds",
            ));
        }
        if self.blacklist_threshold == 0 {
            return Err(HealthError::invalid_config(
                "blacklist_threshold must be at least 1",
                "A threshold of 0 would blacklist endpoints that never failed",
            ));
        }
        if self.max_concurrent_probes == 0 {
            return Err(HealthError::invalid_config(
                "max_concurrent_probes must be at least 1",
                "Use 1 to probe endpoints one after another",
            ));
        }
        if self.probe_timeout.is_zero() {
            return Err(HealthError::invalid_config(
                "probe_timeout must be greater than zero",
                "Set a probe timeout of a few seconds",
            ));
        }
        Ok(())
    }

    pub fn sleep_interval(&self) -> Duration {
        Duration::from_secs(self.sleep_seconds)
    }
}

/// How the pause between two rounds ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    /// The full interval passed
    Elapsed,
    /// A wake request cut the pause short
    Woken,
    /// The monitor was cancelled
    Cancelled,
}

/// Requests an immediate round from a running monitor
///
/// A wake issued while a round is in progress is remembered and ends the
/// following pause right away.
#[derive(Clone)]
pub struct WakeHandle {
    notify: Arc<Notify>,
}

impl WakeHandle {
    pub fn wake(&self) {
        self.notify.notify_one();
    }
}

/// Summary of one evaluation round
#[derive(Debug, Clone)]
pub struct RoundReport {
    pub round: u64,
    pub started_at: DateTime<Utc>,
    /// Endpoints probed this round
    pub probed: usize,
    pub healthy: usize,
    pub failed: usize,
    /// Endpoints of a kind that cannot be probed
    pub skipped: usize,
    /// Names sent to `add_blacklist`
    pub blacklisted: Vec<String>,
    /// Names sent to `remove_blacklist`
    pub cleared: Vec<String>,
    /// Tracker entries dropped because their endpoint left the registry
    pub pruned: Vec<String>,
}

/// Periodically probes every registered endpoint and keeps the registry's
/// blacklist in line with consecutive-failure counts
pub struct BlacklistMonitor {
    registry: Arc<dyn EndpointRegistry>,
    config: MonitorConfig,
    executor: ProbeExecutor,
    tracker: FailureTracker,
    wake: Arc<Notify>,
    rounds: u64,
    early_wakes: u64,
}

impl BlacklistMonitor {
    pub fn new(registry: Arc<dyn EndpointRegistry>, config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            executor: ProbeExecutor::new(config.probe_timeout),
            config,
            tracker: FailureTracker::new(),
            wake: Arc::new(Notify::new()),
            rounds: 0,
            early_wakes: 0,
        })
    }

    pub fn wake_handle(&self) -> WakeHandle {
        WakeHandle {
            notify: self.wake.clone(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn tracker(&self) -> &FailureTracker {
        &self.tracker
    }

    /// Rounds completed so far
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Pauses cut short by a wake request
    pub fn early_wakes(&self) -> u64 {
        self.early_wakes
    }

    /// Run rounds until the token is cancelled
    pub async fn run(&mut self, token: CancellationToken) {
        info!(
            "Starting blacklist monitor (interval: {}s, threshold: {}, concurrency: {})",
            self.config.sleep_seconds,
            self.config.blacklist_threshold,
            self.config.max_concurrent_probes
        );

        loop {
            if token.is_cancelled() {
                break;
            }

            let report = self.run_round().await;
            debug!(
                "Round {} finished: {} probed, {} healthy, {} failed, {} skipped, {} blacklisted",
                report.round,
                report.probed,
                report.healthy,
                report.failed,
                report.skipped,
                report.blacklisted.len()
            );

            if token.is_cancelled() {
                break;
            }

            match self.pause(&token).await {
                Pause::Cancelled => break,
                Pause::Woken => {
                    self.early_wakes += 1;
                    debug!("Blacklist monitor woken early, starting next round");
                }
                Pause::Elapsed => {}
            }
        }

        info!("Blacklist monitor shutting down");
    }

    /// Sleep for the configured interval unless woken or cancelled first
    pub async fn pause(&self, token: &CancellationToken) -> Pause {
        tokio::select! {
            _ = token.cancelled() => Pause::Cancelled,
            _ = self.wake.notified() => Pause::Woken,
            _ = tokio::time::sleep(self.config.sleep_interval()) => Pause::Elapsed,
        }
    }

    /// Probe every endpoint once, then reconcile the blacklist
    pub async fn run_round(&mut self) -> RoundReport {
        self.rounds += 1;
        let started_at = Utc::now();
        let snapshot = self.registry.endpoint_map().await;

        let targets: Vec<(String, Arc<dyn Endpoint>)> = snapshot
            .iter()
            .filter(|(_, endpoint)| endpoint.probe_target().is_some())
            .map(|(name, endpoint)| (name.clone(), endpoint.clone()))
            .collect();
        let skipped = snapshot.len() - targets.len();

        // Each probe future owns its name and endpoint
        let probes: Vec<futures_util::future::BoxFuture<'static, (String, ProbeResult)>> = targets
            .into_iter()
            .map(|(name, endpoint)| {
                let executor = self.executor.clone();
                async move {
                    let result = match endpoint.probe_target() {
                        Some(target) => executor.check(&name, target).await,
                        None => ProbeResult::failure(format!("{} is not probeable", name)),
                    };
                    (name, result)
                }
                .boxed()
            })
            .collect();
        let results: Vec<(String, ProbeResult)> = stream::iter(probes)
            .buffer_unordered(self.config.max_concurrent_probes)
            .collect()
            .await;

        let mut healthy = 0;
        for (name, result) in &results {
            if result.is_success() {
                healthy += 1;
                self.tracker.record_success(name);
            } else {
                let count = self.tracker.record_failure(name);
                debug!(
                    "Endpoint {} failed {} consecutive probe(s) in {:?}",
                    name, count, result.duration
                );
            }
        }

        let pruned = self.tracker.retain(|name| snapshot.contains_key(name));
        if !pruned.is_empty() {
            debug!("Stopped tracking deregistered endpoints: {:?}", pruned);
        }
        // A name that comes back must not inherit its old membership
        for name in &pruned {
            self.registry.remove_blacklist(name).await;
        }

        let (blacklisted, cleared) = self.maintain_blacklist().await;

        RoundReport {
            round: self.rounds,
            started_at,
            probed: results.len(),
            healthy,
            failed: results.len() - healthy,
            skipped,
            blacklisted,
            cleared,
            pruned,
        }
    }

    async fn maintain_blacklist(&self) -> (Vec<String>, Vec<String>) {
        let mut blacklisted = Vec::new();
        let mut cleared = Vec::new();

        for (name, count, action) in self.tracker.decisions(self.config.blacklist_threshold) {
            match action {
                BlacklistAction::Remove => {
                    self.registry.remove_blacklist(&name).await;
                    cleared.push(name);
                }
                BlacklistAction::Add => {
                    warn!(
                        "Adding {} to blacklist ({} consecutive failures)",
                        name, count
                    );
                    self.registry.add_blacklist(&name).await;
                    blacklisted.push(name);
                }
                BlacklistAction::Keep => {}
            }
        }

        (blacklisted, cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{BlacklistCall, MockEndpoint, MockOutcome, MockRegistry};
    use poolwatch_core::UnmanagedEndpoint;

    fn make_config(threshold: u32) -> MonitorConfig {
        MonitorConfig {
            sleep_seconds: 30,
            blacklist_threshold: threshold,
            max_concurrent_probes: 1,
            probe_timeout: Duration::from_secs(5),
        }
    }

    async fn make_monitor(
        threshold: u32,
        endpoints: &[(&str, Arc<MockEndpoint>)],
    ) -> (BlacklistMonitor, Arc<MockRegistry>) {
        let registry = Arc::new(MockRegistry::new());
        for (name, endpoint) in endpoints {
            registry.insert(*name, endpoint.clone()).await;
        }
        let monitor = BlacklistMonitor::new(registry.clone(), make_config(threshold)).unwrap();
        (monitor, registry)
    }

    #[tokio::test]
    async fn test_blacklisted_when_threshold_reached() {
        let endpoint = Arc::new(MockEndpoint::new("10.0.0.2:5432"));
        endpoint.set_default(MockOutcome::ConnectError).await;
        let (mut monitor, registry) = make_monitor(3, &[("e", endpoint.clone())]).await;

        for expected in 1..=2 {
            let report = monitor.run_round().await;
            assert_eq!(monitor.tracker().count("e"), expected);
            assert!(report.blacklisted.is_empty());
            assert!(!registry.is_blacklisted("e").await);
        }

        let report = monitor.run_round().await;
        assert_eq!(monitor.tracker().count("e"), 3);
        assert_eq!(report.blacklisted, vec!["e".to_string()]);
        assert!(registry.is_blacklisted("e").await);
        assert_eq!(
            registry.calls_for("e").await,
            vec![BlacklistCall::Add("e".to_string())]
        );
    }

    #[tokio::test]
    async fn test_single_success_clears_blacklist() {
        let endpoint = Arc::new(MockEndpoint::new("10.0.0.2:5432"));
        for _ in 0..5 {
            endpoint.push_outcome(MockOutcome::ValidationError).await;
        }
        let (mut monitor, registry) = make_monitor(3, &[("e", endpoint.clone())]).await;

        for _ in 0..5 {
            monitor.run_round().await;
        }
        assert_eq!(monitor.tracker().count("e"), 5);
        assert!(registry.is_blacklisted("e").await);

        // Script is exhausted, so the next probe succeeds
        let report = monitor.run_round().await;
        assert_eq!(monitor.tracker().count("e"), 0);
        assert_eq!(report.cleared, vec!["e".to_string()]);
        assert!(!registry.is_blacklisted("e").await);
    }

    #[tokio::test]
    async fn test_non_probeable_endpoint_is_ignored() {
        let registry = Arc::new(MockRegistry::new());
        registry
            .insert("archive", Arc::new(UnmanagedEndpoint::new("archive-cluster")))
            .await;
        let mut monitor = BlacklistMonitor::new(registry.clone(), make_config(1)).unwrap();

        for _ in 0..5 {
            let report = monitor.run_round().await;
            assert_eq!(report.skipped, 1);
            assert_eq!(report.probed, 0);
        }

        assert!(!monitor.tracker().contains("archive"));
        assert!(monitor.tracker().is_empty());
        assert!(registry.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_validation_failure_counts_and_releases() {
        let endpoint = Arc::new(MockEndpoint::new("10.0.0.2:5432"));
        endpoint.push_outcome(MockOutcome::ValidationError).await;
        let (mut monitor, _registry) = make_monitor(3, &[("e", endpoint.clone())]).await;

        let report = monitor.run_round().await;
        assert_eq!(report.failed, 1);
        assert_eq!(monitor.tracker().count("e"), 1);
        assert_eq!(endpoint.opened(), 1);
        assert_eq!(endpoint.closed(), 1);
    }

    #[tokio::test]
    async fn test_close_failure_does_not_count() {
        let endpoint = Arc::new(MockEndpoint::new("10.0.0.2:5432"));
        endpoint.push_outcome(MockOutcome::CloseError).await;
        let (mut monitor, registry) = make_monitor(1, &[("e", endpoint.clone())]).await;

        let report = monitor.run_round().await;
        assert_eq!(report.healthy, 1);
        assert_eq!(monitor.tracker().count("e"), 0);
        assert!(!registry.is_blacklisted("e").await);
    }

    #[tokio::test]
    async fn test_below_threshold_leaves_membership_alone() {
        let endpoint = Arc::new(MockEndpoint::new("10.0.0.2:5432"));
        endpoint.push_outcome(MockOutcome::ConnectError).await;
        let (mut monitor, registry) = make_monitor(3, &[("e", endpoint.clone())]).await;

        monitor.run_round().await;
        assert_eq!(monitor.tracker().count("e"), 1);
        assert!(registry.calls_for("e").await.is_empty());
    }

    #[tokio::test]
    async fn test_successful_endpoint_gets_idempotent_removes() {
        let endpoint = Arc::new(MockEndpoint::new("10.0.0.2:5432"));
        let (mut monitor, registry) = make_monitor(3, &[("e", endpoint.clone())]).await;

        for _ in 0..3 {
            monitor.run_round().await;
        }
        assert_eq!(
            registry.calls_for("e").await,
            vec![BlacklistCall::Remove("e".to_string()); 3]
        );
        assert!(!registry.is_blacklisted("e").await);
    }

    #[tokio::test]
    async fn test_deregistered_endpoint_is_pruned() {
        let stays = Arc::new(MockEndpoint::new("10.0.0.2:5432"));
        let leaves = Arc::new(MockEndpoint::new("10.0.0.3:5432"));
        leaves.set_default(MockOutcome::ConnectError).await;
        let (mut monitor, registry) =
            make_monitor(3, &[("stays", stays.clone()), ("leaves", leaves.clone())]).await;

        monitor.run_round().await;
        assert_eq!(monitor.tracker().count("leaves"), 1);

        registry.remove("leaves").await;
        let report = monitor.run_round().await;

        assert_eq!(report.pruned, vec!["leaves".to_string()]);
        assert!(!monitor.tracker().contains("leaves"));
        assert_eq!(
            registry.calls_for("leaves").await,
            vec![BlacklistCall::Remove("leaves".to_string())]
        );
        assert_eq!(leaves.attempts(), 1);

        // Pruned once only
        let report = monitor.run_round().await;
        assert!(report.pruned.is_empty());
        assert_eq!(registry.calls_for("leaves").await.len(), 1);
    }

    #[tokio::test]
    async fn test_reregistered_endpoint_starts_off_the_blacklist() {
        let endpoint = Arc::new(MockEndpoint::new("10.0.0.2:5432"));
        endpoint.set_default(MockOutcome::ConnectError).await;
        let (mut monitor, registry) = make_monitor(3, &[("e", endpoint.clone())]).await;

        for _ in 0..3 {
            monitor.run_round().await;
        }
        assert!(registry.is_blacklisted("e").await);

        registry.remove("e").await;
        let report = monitor.run_round().await;
        assert_eq!(report.pruned, vec!["e".to_string()]);
        assert!(!registry.is_blacklisted("e").await);

        registry.insert("e", endpoint.clone()).await;
        monitor.run_round().await;
        assert_eq!(monitor.tracker().count("e"), 1);
        assert!(!registry.is_blacklisted("e").await);
    }

    #[tokio::test]
    async fn test_concurrent_probes_cover_every_endpoint() {
        let registry = Arc::new(MockRegistry::new());
        let mut endpoints = Vec::new();
        for i in 0..10 {
            let endpoint = Arc::new(MockEndpoint::new(format!("10.0.0.{}:5432", i)));
            if i % 2 == 0 {
                endpoint.set_default(MockOutcome::ConnectError).await;
            }
            registry.insert(format!("e{}", i), endpoint.clone()).await;
            endpoints.push(endpoint);
        }

        let config = MonitorConfig {
            max_concurrent_probes: 4,
            blacklist_threshold: 1,
            ..make_config(1)
        };
        let mut monitor = BlacklistMonitor::new(registry.clone(), config).unwrap();

        let report = monitor.run_round().await;
        assert_eq!(report.probed, 10);
        assert_eq!(report.failed, 5);
        assert_eq!(report.blacklisted.len(), 5);
        assert!(endpoints.iter().all(|e| e.attempts() == 1));
        assert!(registry.is_blacklisted("e0").await);
        assert!(!registry.is_blacklisted("e1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_interval_pacing() {
        let endpoint = Arc::new(MockEndpoint::new("10.0.0.2:5432"));
        let (mut monitor, _registry) = make_monitor(3, &[("e", endpoint.clone())]).await;

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            monitor.run(loop_token).await;
            monitor
        });

        // Rounds start at t=0, t=30 and t=60
        tokio::time::sleep(Duration::from_secs(61)).await;
        token.cancel();
        let monitor = handle.await.unwrap();

        assert_eq!(monitor.rounds(), 3);
        assert_eq!(endpoint.attempts(), 3);
        assert_eq!(monitor.early_wakes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_starts_next_round_immediately() {
        let endpoint = Arc::new(MockEndpoint::new("10.0.0.2:5432"));
        let (mut monitor, _registry) = make_monitor(3, &[("e", endpoint.clone())]).await;
        let wake = monitor.wake_handle();

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            monitor.run(loop_token).await;
            monitor
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        wake.wake();
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        let monitor = handle.await.unwrap();

        assert_eq!(monitor.rounds(), 2);
        assert_eq!(endpoint.attempts(), 2);
        assert_eq!(monitor.early_wakes(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_no_round() {
        let endpoint = Arc::new(MockEndpoint::new("10.0.0.2:5432"));
        let (mut monitor, _registry) = make_monitor(3, &[("e", endpoint.clone())]).await;

        let token = CancellationToken::new();
        token.cancel();
        monitor.run(token).await;

        assert_eq!(monitor.rounds(), 0);
        assert_eq!(endpoint.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_outcomes() {
        let (monitor, _registry) = make_monitor(3, &[]).await;
        let token = CancellationToken::new();

        assert_eq!(monitor.pause(&token).await, Pause::Elapsed);

        monitor.wake_handle().wake();
        assert_eq!(monitor.pause(&token).await, Pause::Woken);

        token.cancel();
        assert_eq!(monitor.pause(&token).await, Pause::Cancelled);
    }

    #[test]
    fn test_config_validation() {
        assert!(MonitorConfig::default().validate().is_ok());

        let bad = [
            MonitorConfig {
                sleep_seconds: 0,
                ..Default::default()
            },
            MonitorConfig {
                blacklist_threshold: 0,
                ..Default::default()
            },
            MonitorConfig {
                max_concurrent_probes: 0,
                ..Default::default()
            },
            MonitorConfig {
                probe_timeout: Duration::ZERO,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(matches!(
                config.validate(),
                Err(HealthError::InvalidConfig { .. })
            ));
        }
    }

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.sleep_seconds, 30);
        assert_eq!(config.blacklist_threshold, 3);
        assert_eq!(config.max_concurrent_probes, 1);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let registry = Arc::new(MockRegistry::new());
        let config = MonitorConfig {
            blacklist_threshold: 0,
            ..Default::default()
        };
        assert!(BlacklistMonitor::new(registry, config).is_err());
    }
}
