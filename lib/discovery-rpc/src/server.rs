//! Server lifecycle: pick a port, bind, register, serve, deregister

use crate::config::ServerConfig;
use crate::discovery::Discovery;
use crate::error::ServerError;
use crate::port::{bind_listener, find_existing_port, random_port};
use crate::random::RandomSource;
use crate::signal::flag_raised;
use crate::transport::RpcServer;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Lifecycle of a [`Server`]. A server serves at most once; `Stopped` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Binding,
    Registering,
    Serving,
    Stopping,
    Stopped,
}

/// Name and port a server is running under
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerIdentity {
    pub name: String,
    pub port: u16,
}

/// Owns one service's bind/register/serve/deregister sequence
pub struct Server {
    discovery: Arc<Discovery>,
    rng: RandomSource,
    port_range: RangeInclusive<u16>,
    state: watch::Sender<LifecycleState>,
    identity: Mutex<Option<ServerIdentity>>,
    shutdown: watch::Sender<bool>,
    // Raised once the serve future has released its listener
    closed: watch::Sender<bool>,
}

/// Raises the `closed` flag when dropped, including on task abort
struct ClosedGuard<'a>(&'a watch::Sender<bool>);

impl Drop for ClosedGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

impl Server {
    pub fn new(discovery: Arc<Discovery>, config: &ServerConfig, rng: RandomSource) -> Self {
        Self {
            discovery,
            rng,
            port_range: config.port_range.clone(),
            state: watch::channel(LifecycleState::Idle).0,
            identity: Mutex::new(None),
            shutdown: watch::channel(false).0,
            closed: watch::channel(false).0,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Name and port while the server holds a listener
    pub fn identity(&self) -> Option<ServerIdentity> {
        self.identity.lock().ok().and_then(|identity| identity.clone())
    }

    /// Serve `name` until [`Server::stop`] is called.
    ///
    /// Reuses the port of an existing local registration of `name` if there
    /// is one, otherwise picks a random port. `configure` attaches handlers
    /// before the server is registered. Every failure before serving is
    /// fatal and leaves the server `Stopped`.
    pub async fn serve<F>(&self, name: &str, configure: F) -> Result<(), ServerError>
    where
        F: FnOnce(&mut RpcServer) + Send,
    {
        self.transition(LifecycleState::Idle, LifecycleState::Binding)?;
        let _closed = ClosedGuard(&self.closed);

        let result = self.run(name, configure).await;
        if let Err(e) = &result {
            error!("Server {} failed: {}", name, e);
            self.set_identity(None);
            self.state.send_if_modified(|state| match *state {
                LifecycleState::Stopping | LifecycleState::Stopped => false,
                _ => {
                    *state = LifecycleState::Stopped;
                    true
                }
            });
        }
        result
    }

    async fn run<F>(&self, name: &str, configure: F) -> Result<(), ServerError>
    where
        F: FnOnce(&mut RpcServer) + Send,
    {
        let port = match self.existing_port(name).await? {
            Some(port) => {
                info!("Reusing existing port {} for {}", port, name);
                port
            }
            None => random_port(&self.rng, &self.port_range).ok_or(
                ServerError::EmptyPortRange {
                    start: *self.port_range.start(),
                    end: *self.port_range.end(),
                },
            )?,
        };

        let listener =
            bind_listener(port).map_err(|source| ServerError::ListenFailed { port, source })?;
        self.set_identity(Some(ServerIdentity {
            name: name.to_string(),
            port,
        }));

        let mut rpc_server = RpcServer::new();
        configure(&mut rpc_server);

        if !self.advance(LifecycleState::Binding, LifecycleState::Registering) {
            return Ok(());
        }
        self.discovery
            .register(name, port)
            .await
            .map_err(ServerError::RegistrationFailed)?;
        info!(name = %name, port = port, "Registered with discovery service");

        if !self.advance(LifecycleState::Registering, LifecycleState::Serving) {
            return Ok(());
        }
        rpc_server
            .serve(listener, self.shutdown.subscribe())
            .await
            .map_err(ServerError::Serve)
    }

    /// Stop serving and remove the registration.
    ///
    /// Deregistration is attempted once; its failure is returned but the
    /// server still ends up `Stopped`.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let mut previous = LifecycleState::Idle;
        self.state.send_if_modified(|state| {
            previous = *state;
            match *state {
                LifecycleState::Idle => {
                    *state = LifecycleState::Stopped;
                    true
                }
                LifecycleState::Binding
                | LifecycleState::Registering
                | LifecycleState::Serving => {
                    *state = LifecycleState::Stopping;
                    true
                }
                LifecycleState::Stopping | LifecycleState::Stopped => false,
            }
        });

        match previous {
            LifecycleState::Idle | LifecycleState::Stopped => return Ok(()),
            LifecycleState::Stopping => return Err(ServerError::InvalidState(previous)),
            _ => {}
        }

        info!("Stopping server");
        self.shutdown.send_replace(true);
        let mut closed = self.closed.subscribe();
        flag_raised(&mut closed).await;

        let result = match self.identity() {
            Some(identity) => self
                .discovery
                .deregister(&identity.name)
                .await
                .map_err(ServerError::DeregistrationFailed),
            None => Ok(()),
        };
        match &result {
            Ok(()) => info!("Deregistered from discovery service"),
            Err(e) => warn!("Failed to deregister from discovery service: {}", e),
        }

        self.set_identity(None);
        self.state.send_replace(LifecycleState::Stopped);
        result
    }

    async fn existing_port(&self, name: &str) -> Result<Option<u16>, ServerError> {
        let services = self
            .discovery
            .list_local_services()
            .await
            .map_err(ServerError::PortDiscoveryFailed)?;
        Ok(find_existing_port(&services, name))
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<(), ServerError> {
        let mut current = from;
        let moved = self.state.send_if_modified(|state| {
            current = *state;
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if moved {
            Ok(())
        } else {
            Err(ServerError::InvalidState(current))
        }
    }

    /// Move forward unless a stop request got in first
    fn advance(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.transition(from, to).is_ok()
    }

    fn set_identity(&self, identity: Option<ServerIdentity>) {
        if let Ok(mut current) = self.identity.lock() {
            *current = identity;
        }
    }
}
