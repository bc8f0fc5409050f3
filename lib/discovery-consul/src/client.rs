//! HTTP client for a local Consul agent

use crate::api::{AgentService, ServiceEntry, ServiceRegistration};
use async_trait::async_trait;
use discovery_core::{DiscoveryError, Node, Registry, Result, ServiceRecord};
use reqwest::{Client, Response, StatusCode, Url};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Default agent address, matching the Consul CLI default
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:8500";

/// Upper bound for any single agent request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection settings for the agent
#[derive(Clone, Debug, PartialEq)]
pub struct ConsulConfig {
    /// `host:port` or a full `http://host:port` URL
    pub address: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ConsulConfig {
    /// Load configuration from `CONSUL_HTTP_ADDR`, falling back to defaults
    pub fn from_env() -> Self {
        match std::env::var("CONSUL_HTTP_ADDR") {
            Ok(address) if !address.trim().is_empty() => Self {
                address: address.trim().to_string(),
                ..Self::default()
            },
            _ => Self::default(),
        }
    }

    /// Base URL with an explicit scheme and no trailing slash
    pub fn base_url(&self) -> String {
        let address = self.address.trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        }
    }
}

/// ConsulRegistry talks to the agent's HTTP API
pub struct ConsulRegistry {
    http: Client,
    base_url: Url,
}

impl ConsulRegistry {
    /// Create a new agent client
    pub fn new(config: ConsulConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DiscoveryError::RegistryUnavailable(e.to_string()))?;
        let base_url = Url::parse(&config.base_url()).map_err(|e| {
            DiscoveryError::RegistryUnavailable(format!(
                "invalid agent address {}: {}",
                config.address, e
            ))
        })?;

        Ok(Self { http, base_url })
    }

    /// Get the agent base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append path segments to the base URL. Each segment is percent-encoded,
    /// so a service name can never spill into the query or fragment.
    fn endpoint(&self, segments: &[&str]) -> std::result::Result<Url, String> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| format!("agent address {} cannot carry a path", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, url: Url) -> std::result::Result<Response, String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        check_status(response)
    }
}

fn check_status(response: Response) -> std::result::Result<Response, String> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(format!("agent returned {}", status))
    }
}

#[async_trait]
impl Registry for ConsulRegistry {
    async fn local_services(&self) -> Result<Vec<ServiceRecord>> {
        let url = self
            .endpoint(&["v1", "agent", "services"])
            .map_err(DiscoveryError::RegistryUnavailable)?;
        let services: HashMap<String, AgentService> = self
            .get(url)
            .await
            .map_err(DiscoveryError::RegistryUnavailable)?
            .json()
            .await
            .map_err(|e| DiscoveryError::RegistryUnavailable(e.to_string()))?;

        let records = services
            .into_values()
            .map(|service| {
                debug!(
                    name = %service.id,
                    address = %service.address,
                    port = service.port,
                    "Agent reports local service"
                );
                ServiceRecord::new(service.id, Node::new(service.address, service.port))
            })
            .collect();
        Ok(records)
    }

    async fn healthy_instances(&self, name: &str) -> Result<Vec<Node>> {
        let mut url = self
            .endpoint(&["v1", "health", "service", name])
            .map_err(DiscoveryError::RegistryUnavailable)?;
        url.query_pairs_mut().append_pair("passing", "true");

        let entries: Vec<ServiceEntry> = self
            .get(url)
            .await
            .map_err(DiscoveryError::RegistryUnavailable)?
            .json()
            .await
            .map_err(|e| DiscoveryError::RegistryUnavailable(e.to_string()))?;

        let nodes = entries
            .iter()
            .map(|entry| {
                debug!(
                    name = %entry.service.id,
                    address = %entry.dial_address(),
                    port = entry.service.port,
                    "Found healthy instance"
                );
                Node::new(entry.dial_address(), entry.service.port)
            })
            .collect();
        Ok(nodes)
    }

    async fn register(&self, name: &str, port: u16) -> Result<()> {
        let registration = ServiceRegistration {
            id: name.to_string(),
            name: name.to_string(),
            port,
        };
        let failed = |reason: String| DiscoveryError::RegistrationFailed {
            name: name.to_string(),
            reason,
        };

        let url = self
            .endpoint(&["v1", "agent", "service", "register"])
            .map_err(failed)?;
        let response = self
            .http
            .put(url)
            .json(&registration)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        check_status(response).map_err(failed)?;

        debug!("Agent accepted registration of {} on port {}", name, port);
        Ok(())
    }

    async fn deregister(&self, name: &str) -> Result<()> {
        let failed = |reason: String| DiscoveryError::DeregistrationFailed {
            name: name.to_string(),
            reason,
        };

        let url = self
            .endpoint(&["v1", "agent", "service", "deregister", name])
            .map_err(failed)?;
        let response = self
            .http
            .put(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            warn!("Service {} was not registered with the agent", name);
            return Ok(());
        }
        check_status(response).map_err(failed)?;

        debug!("Agent removed registration of {}", name);
        Ok(())
    }
}
