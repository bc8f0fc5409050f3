//! Discovery-backed RPC clients and servers
//!
//! Servers pick a port, bind, register with the registry and serve until
//! stopped. Clients resolve a service name to one healthy node and connect
//! to it.
pub mod config;
pub mod connector;
pub mod discovery;
pub mod error;
pub mod metrics;
pub mod metrics_server;
pub mod port;
pub mod random;
pub mod selector;
pub mod server;
pub mod signal;
pub mod transport;

pub use config::ServerConfig;
pub use connector::Connector;
pub use discovery::Discovery;
pub use error::{DialError, ServerError};
pub use metrics::{DiscoveryMetrics, InstrumentationSink, MemorySink, NoopSink};
pub use metrics_server::MetricsServer;
pub use random::RandomSource;
pub use selector::NodeSelector;
pub use server::{LifecycleState, Server, ServerIdentity};
pub use transport::{HttpTransport, RpcConnection, RpcServer, RpcStatus, Transport, TransportError};
