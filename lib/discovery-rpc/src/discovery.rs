//! Registry adapter: instrumented access to the service registry

use crate::metrics::InstrumentationSink;
use crate::selector::NodeSelector;
use discovery_core::{DiscoveryError, Node, Registry, Result, ServiceRecord};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const LIST_LOCAL_SERVICES: &str = "list_local_services";
pub const LIST_SERVICE_INSTANCES: &str = "list_service_instances";
pub const PICK_RANDOM_INSTANCE: &str = "pick_random_instance";
pub const REGISTER: &str = "register";
pub const DEREGISTER: &str = "deregister";

/// Discovery wraps a registry with node selection and instrumentation
pub struct Discovery {
    registry: Arc<dyn Registry>,
    sink: Arc<dyn InstrumentationSink>,
    selector: NodeSelector,
}

impl Discovery {
    pub fn new(
        registry: Arc<dyn Registry>,
        sink: Arc<dyn InstrumentationSink>,
        selector: NodeSelector,
    ) -> Self {
        Self {
            registry,
            sink,
            selector,
        }
    }

    /// Get the underlying registry
    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// Services registered through the local agent
    pub async fn list_local_services(&self) -> Result<Vec<ServiceRecord>> {
        self.instrumented(LIST_LOCAL_SERVICES, self.registry.local_services())
            .await
    }

    /// Healthy instances of `name` across the cluster
    pub async fn list_service_instances(&self, name: &str) -> Result<Vec<Node>> {
        self.instrumented(LIST_SERVICE_INSTANCES, self.registry.healthy_instances(name))
            .await
    }

    /// One healthy instance of `name`, chosen uniformly at random
    pub async fn pick_random_instance(&self, name: &str) -> Result<Node> {
        self.instrumented(PICK_RANDOM_INSTANCE, self.select_instance(name))
            .await
    }

    /// `host:port` of a randomly chosen healthy instance of `name`
    pub async fn random_service_address(&self, name: &str) -> Result<String> {
        Ok(self.pick_random_instance(name).await?.host_port())
    }

    /// Register this host's `name -> port` mapping
    pub async fn register(&self, name: &str, port: u16) -> Result<()> {
        self.instrumented(REGISTER, self.registry.register(name, port))
            .await
    }

    /// Remove this host's registration of `name`
    pub async fn deregister(&self, name: &str) -> Result<()> {
        self.instrumented(DEREGISTER, self.registry.deregister(name))
            .await
    }

    async fn select_instance(&self, name: &str) -> Result<Node> {
        let nodes = self.list_service_instances(name).await?;
        let (index, node) = self
            .selector
            .select(&nodes)
            .ok_or_else(|| DiscoveryError::NoInstancesAvailable(name.to_string()))?;

        info!(
            total = nodes.len(),
            index_chosen = index,
            address = %node.address,
            port = node.port,
            "Randomly chose node"
        );
        Ok(node.clone())
    }

    /// Count the call and time it, whatever its outcome
    async fn instrumented<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        debug!("-> discovery.{}", operation);
        self.sink.record_call(operation);
        let start = Instant::now();

        let result = call.await;

        let elapsed = start.elapsed().as_secs_f64() * 1_000_000.0;
        self.sink.observe_latency(operation, elapsed);
        debug!(elapsed_us = elapsed, ok = result.is_ok(), "<- discovery.{}", operation);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MemorySink;
    use crate::random::RandomSource;
    use discovery_core::InMemoryRegistry;

    fn discovery_with(registry: Arc<InMemoryRegistry>, sink: Arc<MemorySink>) -> Discovery {
        Discovery::new(registry, sink, NodeSelector::new(RandomSource::seeded(17)))
    }

    #[tokio::test]
    async fn test_pick_random_instance_empty() {
        let registry = Arc::new(InMemoryRegistry::new());
        let discovery = discovery_with(registry, Arc::new(MemorySink::new()));

        let result = discovery.pick_random_instance("svc-x").await;
        assert!(matches!(result, Err(DiscoveryError::NoInstancesAvailable(name)) if name == "svc-x"));
    }

    #[tokio::test]
    async fn test_pick_random_instance_from_healthy() {
        let registry = Arc::new(InMemoryRegistry::new());
        let healthy = Node::new("10.0.0.1", 7000);
        let failing = Node::new("10.0.0.2", 7000);
        registry.add_instance("svc", healthy.clone()).await;
        registry.add_instance("svc", failing.clone()).await;
        registry.set_health("svc", &failing, false).await.unwrap();
        let discovery = discovery_with(registry, Arc::new(MemorySink::new()));

        for _ in 0..50 {
            assert_eq!(discovery.pick_random_instance("svc").await.unwrap(), healthy);
        }
    }

    #[tokio::test]
    async fn test_random_service_address() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry
            .add_instance("svc-c", Node::new("127.0.0.1", 7001))
            .await;
        let discovery = discovery_with(registry, Arc::new(MemorySink::new()));

        assert_eq!(
            discovery.random_service_address("svc-c").await.unwrap(),
            "127.0.0.1:7001"
        );
    }

    #[tokio::test]
    async fn test_every_operation_is_instrumented() {
        let registry = Arc::new(InMemoryRegistry::new());
        let sink = Arc::new(MemorySink::new());
        let discovery = discovery_with(registry, sink.clone());

        discovery.register("svc-a", 6000).await.unwrap();
        discovery.list_local_services().await.unwrap();
        discovery.pick_random_instance("svc-a").await.unwrap();
        discovery.deregister("svc-a").await.unwrap();

        for operation in [LIST_LOCAL_SERVICES, PICK_RANDOM_INSTANCE, REGISTER, DEREGISTER] {
            assert_eq!(sink.calls(operation), 1, "{}", operation);
            assert_eq!(sink.latencies(operation).len(), 1, "{}", operation);
        }
        // Picking a node lists instances first
        assert_eq!(sink.calls(LIST_SERVICE_INSTANCES), 1);
    }

    #[tokio::test]
    async fn test_failures_are_instrumented_and_propagated() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.set_available(false);
        let sink = Arc::new(MemorySink::new());
        let discovery = discovery_with(registry, sink.clone());

        assert!(matches!(
            discovery.list_service_instances("svc").await,
            Err(DiscoveryError::RegistryUnavailable(_))
        ));
        assert!(matches!(
            discovery.pick_random_instance("svc").await,
            Err(DiscoveryError::RegistryUnavailable(_))
        ));
        assert_eq!(sink.calls(LIST_SERVICE_INSTANCES), 2);
        assert_eq!(sink.latencies(PICK_RANDOM_INSTANCE).len(), 1);
    }

    #[tokio::test]
    async fn test_register_round_trip_through_adapter() {
        let registry = Arc::new(InMemoryRegistry::new());
        let discovery = discovery_with(registry, Arc::new(MemorySink::new()));

        discovery.register("svc-a", 6000).await.unwrap();
        let local = discovery.list_local_services().await.unwrap();
        assert!(local.iter().any(|r| r.name == "svc-a" && r.node.port == 6000));

        discovery.deregister("svc-a").await.unwrap();
        let local = discovery.list_local_services().await.unwrap();
        assert!(local.iter().all(|r| r.name != "svc-a"));
    }
}
