use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("No healthy instances available for service: {0}")]
    NoInstancesAvailable(String),

    #[error("Failed to register service {name}: {reason}")]
    RegistrationFailed { name: String, reason: String },

    #[error("Failed to deregister service {name}: {reason}")]
    DeregistrationFailed { name: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
