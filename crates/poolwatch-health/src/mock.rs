use async_trait::async_trait;
use poolwatch_core::{
    ConnectProperties, Connection, Driver, Endpoint, EndpointRegistry, PoolError, ProbeTarget,
    Result,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Scripted result of one mock probe attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    /// Connect and validation both succeed
    Healthy,
    /// The driver refuses to open a connection
    ConnectError,
    /// A connection opens but validation fails
    ValidationError,
    /// Validation succeeds but closing the connection fails
    CloseError,
}

#[derive(Default)]
struct MockProbeState {
    script: Mutex<VecDeque<MockOutcome>>,
    default_outcome: Mutex<Option<MockOutcome>>,
    attempts: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl MockProbeState {
    async fn next_outcome(&self) -> MockOutcome {
        if let Some(outcome) = self.script.lock().await.pop_front() {
            return outcome;
        }
        self.default_outcome
            .lock()
            .await
            .unwrap_or(MockOutcome::Healthy)
    }
}

/// Probeable endpoint whose probe results are scripted
///
/// Outcomes pushed with `push_outcome` are consumed one per probe attempt;
/// once the script is empty every attempt uses the default outcome.
pub struct MockEndpoint {
    address: String,
    properties: ConnectProperties,
    state: Arc<MockProbeState>,
    driver: Arc<MockDriver>,
}

impl MockEndpoint {
    pub fn new(address: impl Into<String>) -> Self {
        let state = Arc::new(MockProbeState::default());
        Self {
            address: address.into(),
            properties: ConnectProperties::new(),
            driver: Arc::new(MockDriver {
                state: state.clone(),
            }),
            state,
        }
    }

    /// Queue the outcome of the next unscripted probe attempt
    pub async fn push_outcome(&self, outcome: MockOutcome) {
        self.state.script.lock().await.push_back(outcome);
    }

    /// Outcome used once the script runs dry
    pub async fn set_default(&self, outcome: MockOutcome) {
        *self.state.default_outcome.lock().await = Some(outcome);
    }

    /// Number of connect attempts made against this endpoint
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Number of connections successfully opened
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Number of close calls on opened connections
    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }
}

impl Endpoint for MockEndpoint {
    fn address(&self) -> &str {
        &self.address
    }

    fn probe_target(&self) -> Option<&dyn ProbeTarget> {
        Some(self)
    }
}

#[async_trait]
impl ProbeTarget for MockEndpoint {
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
        conn.is_valid().await
    }
}

/// Driver backing `MockEndpoint`
pub struct MockDriver {
    state: Arc<MockProbeState>,
}

#[async_trait]
impl Driver for MockDriver {
    async fn connect(
        &self,
        address: &str,
        _properties: &ConnectProperties,
    ) -> Result<Box<dyn Connection>> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self.state.next_outcome().await;

        if outcome == MockOutcome::ConnectError {
            return Err(PoolError::connect_failed(address, "connection refused", None));
        }

        self.state.opened.fetch_add(1, Ordering::SeqCst);
        debug!("Mock: connection opened to {}", address);
        Ok(Box::new(MockConnection {
            address: address.to_string(),
            outcome,
            state: self.state.clone(),
        }))
    }
}

struct MockConnection {
    address: String,
    outcome: MockOutcome,
    state: Arc<MockProbeState>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&mut self, _statement: &str) -> Result<String> {
        self.is_valid().await?;
        Ok("1".to_string())
    }

    async fn is_valid(&mut self) -> Result<()> {
        if self.outcome == MockOutcome::ValidationError {
            return Err(PoolError::validation_failed(
                &self.address,
                "validation query failed",
            ));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        if self.outcome == MockOutcome::CloseError {
            return Err(PoolError::close_failed(&self.address, "broken pipe"));
        }
        Ok(())
    }
}

/// Blacklist call observed by `MockRegistry`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlacklistCall {
    Add(String),
    Remove(String),
}

/// Registry for tests
///
/// Records every blacklist call, including calls for names it does not know.
#[derive(Default)]
pub struct MockRegistry {
    endpoints: RwLock<HashMap<String, Arc<dyn Endpoint>>>,
    blacklist: RwLock<HashSet<String>>,
    calls: Mutex<Vec<BlacklistCall>>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, name: impl Into<String>, endpoint: Arc<dyn Endpoint>) {
        self.endpoints.write().await.insert(name.into(), endpoint);
    }

    pub async fn remove(&self, name: &str) {
        self.endpoints.write().await.remove(name);
    }

    pub async fn is_blacklisted(&self, name: &str) -> bool {
        self.blacklist.read().await.contains(name)
    }

    /// Every blacklist call received so far, in order
    pub async fn calls(&self) -> Vec<BlacklistCall> {
        self.calls.lock().await.clone()
    }

    /// Blacklist calls that mention `name`
    pub async fn calls_for(&self, name: &str) -> Vec<BlacklistCall> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| match c {
                BlacklistCall::Add(n) | BlacklistCall::Remove(n) => n == name,
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EndpointRegistry for MockRegistry {
    async fn endpoint_map(&self) -> HashMap<String, Arc<dyn Endpoint>> {
        self.endpoints.read().await.clone()
    }

    async fn add_blacklist(&self, name: &str) {
        self.calls
            .lock()
            .await
            .push(BlacklistCall::Add(name.to_string()));
        self.blacklist.write().await.insert(name.to_string());
    }

    async fn remove_blacklist(&self, name: &str) {
        self.calls
            .lock()
            .await
            .push(BlacklistCall::Remove(name.to_string()));
        self.blacklist.write().await.remove(name);
    }
}
