//! Server and client settings

use crate::port::PORT_RANGE;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::time::Duration;
use tracing::warn;

#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    /// Ports to choose from when no existing registration is found
    pub port_range: RangeInclusive<u16>,
    /// Listener for the `/metrics` endpoint; disabled when `None`
    pub metrics_addr: Option<SocketAddr>,
    /// Client connect timeout
    pub connect_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port_range: PORT_RANGE,
            metrics_addr: None,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Load settings from `DISCOVERY_METRICS_ADDR` and
    /// `DISCOVERY_CONNECT_TIMEOUT_MS`. Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("DISCOVERY_METRICS_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(addr) => config.metrics_addr = Some(addr),
                Err(e) => warn!("Ignoring DISCOVERY_METRICS_ADDR={}: {}", addr, e),
            }
        }

        if let Some(timeout) = lookup("DISCOVERY_CONNECT_TIMEOUT_MS") {
            match timeout.parse::<u64>() {
                Ok(ms) => config.connect_timeout = Duration::from_millis(ms),
                Err(e) => warn!("Ignoring DISCOVERY_CONNECT_TIMEOUT_MS={}: {}", timeout, e),
            }
        }

        config
    }
}
