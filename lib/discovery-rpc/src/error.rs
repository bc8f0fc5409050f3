use crate::server::LifecycleState;
use crate::transport::TransportError;
use discovery_core::DiscoveryError;
use thiserror::Error;

/// Failure to open a connection to a named service
#[derive(Error, Debug)]
pub enum DialError {
    #[error("Discovery failed for service {name}: {source}")]
    DiscoveryFailed {
        name: String,
        #[source]
        source: DiscoveryError,
    },

    #[error("Connect to {address} failed: {source}")]
    ConnectFailed {
        address: String,
        #[source]
        source: TransportError,
    },
}

/// Failure of a server lifecycle step
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Port discovery failed: {0}")]
    PortDiscoveryFailed(#[source] DiscoveryError),

    #[error("Port range {start}-{end} is empty")]
    EmptyPortRange { start: u16, end: u16 },

    #[error("Failed to listen on port {port}: {source}")]
    ListenFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Registration failed: {0}")]
    RegistrationFailed(#[source] DiscoveryError),

    #[error("Deregistration failed: {0}")]
    DeregistrationFailed(#[source] DiscoveryError),

    #[error("Server is {0:?}, operation not allowed")]
    InvalidState(LifecycleState),

    #[error("RPC server error: {0}")]
    Serve(#[source] std::io::Error),
}
