use crate::error::{PoolError, Result};
use crate::traits::{Endpoint, EndpointRegistry};
use async_trait::async_trait;
use rand::seq::IteratorRandom;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Default)]
struct SelectorState {
    endpoints: HashMap<String, Arc<dyn Endpoint>>,
    blacklist: HashSet<String>,
}

/// In-memory endpoint registry that picks a random healthy endpoint
///
/// Endpoints and blacklist live behind one lock so a selection never sees a
/// blacklist entry for an endpoint that is no longer registered.
#[derive(Default)]
pub struct RandomSelector {
    state: RwLock<SelectorState>,
}

impl RandomSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint, replacing any previous one with the same name
    ///
    /// A replaced endpoint's blacklist membership is dropped with it.
    pub async fn register(
        &self,
        name: impl Into<String>,
        endpoint: Arc<dyn Endpoint>,
    ) -> Result<Option<Arc<dyn Endpoint>>> {
        let name = name.into();
        if name.is_empty() {
            return Err(PoolError::invalid_endpoint(name, "name must not be empty"));
        }

        let mut state = self.state.write().await;
        if state.blacklist.remove(&name) {
            debug!("Endpoint {} replaced, blacklist entry dropped", name);
        }
        info!("Registered endpoint {} ({})", name, endpoint.address());
        Ok(state.endpoints.insert(name, endpoint))
    }

    /// Remove an endpoint along with its blacklist membership
    pub async fn deregister(&self, name: &str) -> Option<Arc<dyn Endpoint>> {
        let mut state = self.state.write().await;
        state.blacklist.remove(name);
        let removed = state.endpoints.remove(name);
        if removed.is_some() {
            info!("Deregistered endpoint {}", name);
        }
        removed
    }

    /// Pick a random endpoint that is not blacklisted
    ///
    /// When every endpoint is blacklisted the pick falls back to the full set.
    pub async fn select(&self) -> Option<(String, Arc<dyn Endpoint>)> {
        let state = self.state.read().await;
        if state.endpoints.is_empty() {
            return None;
        }

        let mut rng = rand::thread_rng();
        let healthy = state
            .endpoints
            .iter()
            .filter(|(name, _)| !state.blacklist.contains(*name))
            .choose(&mut rng);

        let picked = match healthy {
            Some(entry) => entry,
            None => {
                warn!(
                    "All {} endpoints are blacklisted, selecting from the full set",
                    state.endpoints.len()
                );
                state.endpoints.iter().choose(&mut rng)?
            }
        };

        Some((picked.0.clone(), picked.1.clone()))
    }

    pub async fn is_blacklisted(&self, name: &str) -> bool {
        self.state.read().await.blacklist.contains(name)
    }

    /// Sorted names of the blacklisted endpoints
    pub async fn blacklist(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state.blacklist.iter().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.endpoints.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.endpoints.is_empty()
    }
}

#[async_trait]
impl EndpointRegistry for RandomSelector {
    async fn endpoint_map(&self) -> HashMap<String, Arc<dyn Endpoint>> {
        self.state.read().await.endpoints.clone()
    }

    async fn add_blacklist(&self, name: &str) {
        let mut state = self.state.write().await;
        if !state.endpoints.contains_key(name) {
            debug!("Ignoring blacklist request for unknown endpoint {}", name);
            return;
        }
        if state.blacklist.insert(name.to_string()) {
            debug!("Endpoint {} is now blacklisted", name);
        }
    }

    async fn remove_blacklist(&self, name: &str) {
        let mut state = self.state.write().await;
        if state.blacklist.remove(name) {
            debug!("Endpoint {} removed from blacklist", name);
        }
    }
}
