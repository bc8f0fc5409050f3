//! Registry contract and an in-memory implementation of it

use crate::{DiscoveryError, Node, Result, ServiceRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Minimal contract a service registry has to satisfy.
///
/// Reads may be issued concurrently; writes for a given service name are
/// expected to come from a single owner.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Every service registered through the local agent.
    async fn local_services(&self) -> Result<Vec<ServiceRecord>>;

    /// All healthy instances of `name`, cluster-wide. An empty list is not an error.
    async fn healthy_instances(&self, name: &str) -> Result<Vec<Node>>;

    /// Register this host's `name -> port` mapping. Registering the same
    /// mapping again replaces the previous entry.
    async fn register(&self, name: &str, port: u16) -> Result<()>;

    /// Remove this host's registration for `name`. Missing entries are not an error.
    async fn deregister(&self, name: &str) -> Result<()>;
}

#[derive(Clone, Debug)]
struct Instance {
    node: Node,
    healthy: bool,
    local: bool,
}

/// InMemoryRegistry keeps service instances in process memory
pub struct InMemoryRegistry {
    local_address: String,
    // Map of service name to its known instances
    services: Arc<RwLock<HashMap<String, Vec<Instance>>>>,
    available: AtomicBool,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::with_local_address("127.0.0.1")
    }

    /// Create a registry whose local registrations advertise `address`
    pub fn with_local_address(address: impl Into<String>) -> Self {
        Self {
            local_address: address.into(),
            services: Arc::new(RwLock::new(HashMap::new())),
            available: AtomicBool::new(true),
        }
    }

    /// Add an instance living on another host
    pub async fn add_instance(&self, name: &str, node: Node) {
        let mut services = self.services.write().await;
        let instances = services.entry(name.to_string()).or_default();
        instances.retain(|i| i.node != node);
        instances.push(Instance {
            node,
            healthy: true,
            local: false,
        });
        debug!("Added instance for service: {}", name);
    }

    /// Mark an instance as passing or failing its health check
    pub async fn set_health(&self, name: &str, node: &Node, healthy: bool) -> Result<()> {
        let mut services = self.services.write().await;
        let instance = services
            .get_mut(name)
            .and_then(|instances| instances.iter_mut().find(|i| &i.node == node))
            .ok_or_else(|| DiscoveryError::NoInstancesAvailable(name.to_string()))?;
        instance.healthy = healthy;
        Ok(())
    }

    /// Simulate the agent becoming unreachable (or reachable again)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Get count of registered instances across all services
    pub async fn instance_count(&self) -> usize {
        let services = self.services.read().await;
        services.values().map(Vec::len).sum()
    }

    fn check_available(&self) -> std::result::Result<(), String> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err("agent unreachable".to_string())
        }
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn local_services(&self) -> Result<Vec<ServiceRecord>> {
        self.check_available()
            .map_err(DiscoveryError::RegistryUnavailable)?;

        let services = self.services.read().await;
        Ok(services
            .iter()
            .flat_map(|(name, instances)| {
                instances
                    .iter()
                    .filter(|i| i.local)
                    .map(move |i| ServiceRecord::new(name.clone(), i.node.clone()))
            })
            .collect())
    }

    async fn healthy_instances(&self, name: &str) -> Result<Vec<Node>> {
        self.check_available()
            .map_err(DiscoveryError::RegistryUnavailable)?;

        let services = self.services.read().await;
        Ok(services
            .get(name)
            .map(|instances| {
                instances
                    .iter()
                    .filter(|i| i.healthy)
                    .map(|i| i.node.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn register(&self, name: &str, port: u16) -> Result<()> {
        self.check_available()
            .map_err(|reason| DiscoveryError::RegistrationFailed {
                name: name.to_string(),
                reason,
            })?;

        let mut services = self.services.write().await;
        let instances = services.entry(name.to_string()).or_default();
        instances.retain(|i| !i.local);
        instances.push(Instance {
            node: Node::new(self.local_address.clone(), port),
            healthy: true,
            local: true,
        });

        debug!("Registered service: {} on port {}", name, port);
        Ok(())
    }

    async fn deregister(&self, name: &str) -> Result<()> {
        self.check_available()
            .map_err(|reason| DiscoveryError::DeregistrationFailed {
                name: name.to_string(),
                reason,
            })?;

        let mut services = self.services.write().await;
        if let Some(instances) = services.get_mut(name) {
            instances.retain(|i| !i.local);
            if instances.is_empty() {
                services.remove(name);
            }
        }
        debug!("Deregistered service: {}", name);
        Ok(())
    }
}
