//! Client connector: resolve a service name and connect to one of its nodes

use crate::discovery::Discovery;
use crate::error::DialError;
use crate::transport::Transport;
use std::sync::Arc;
use tracing::{debug, info};

/// Connector opens connections to services by name
pub struct Connector<T: Transport> {
    discovery: Arc<Discovery>,
    transport: T,
}

impl<T: Transport> Connector<T> {
    pub fn new(discovery: Arc<Discovery>, transport: T) -> Self {
        Self {
            discovery,
            transport,
        }
    }

    /// Get the transport used to open connections
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Connect to one randomly chosen healthy node of `name`.
    ///
    /// A single attempt against a single node: a failed connect is returned
    /// as-is, without trying another node.
    pub async fn dial(&self, name: &str) -> Result<T::Connection, DialError> {
        let node = self
            .discovery
            .pick_random_instance(name)
            .await
            .map_err(|source| DialError::DiscoveryFailed {
                name: name.to_string(),
                source,
            })?;

        let address = node.host_port();
        debug!("Dialing {} at {}", name, address);

        let connection = self
            .transport
            .connect(&address)
            .await
            .map_err(|source| DialError::ConnectFailed {
                address: address.clone(),
                source,
            })?;

        info!("Connected to {} at {}", name, address);
        Ok(connection)
    }
}
