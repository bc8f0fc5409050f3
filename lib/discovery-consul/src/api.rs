//! Wire types of the Consul agent and health endpoints

use serde::{Deserialize, Serialize};

/// A service as reported by `/v1/agent/services` and inside health entries
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentService {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub address: String,
    pub port: u16,
}

/// The catalog node hosting a service instance
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CatalogNode {
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub address: String,
}

/// One entry of `/v1/health/service/<name>`
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceEntry {
    pub node: CatalogNode,
    pub service: AgentService,
}

impl ServiceEntry {
    /// Address to dial: the service address when advertised, otherwise the node address
    pub fn dial_address(&self) -> &str {
        if self.service.address.is_empty() {
            &self.node.address
        } else {
            &self.service.address
        }
    }
}

/// Body of `PUT /v1/agent/service/register`
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub port: u16,
}
