//! Minimal RPC transport: unary calls framed as HTTP/1.1 `POST /rpc/<method>`
//!
//! The lifecycle manager and connector only need a server object that
//! handlers can be attached to, and a way to open a connection to an
//! address. Anything richer belongs to the RPC framework in use.

use crate::signal::flag_raised;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use http_body_util::{BodyExt, Full};
use hyper::{
    body::Bytes, client::conn::http1 as client_http1, header, server::conn::http1,
    service::service_fn, Method, Request, Response, StatusCode,
};
use hyper_util::rt::tokio::TokioIo;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, info, warn};

/// Path prefix of every RPC method
pub const RPC_PATH_PREFIX: &str = "/rpc/";

/// Status returned by a handler or by the server for a failed call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("RPC status {code}: {message}")]
pub struct RpcStatus {
    pub code: u16,
    pub message: String,
}

impl RpcStatus {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST.as_u16(), message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND.as_u16(), message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR.as_u16(), message)
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connect to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Status(#[from] RpcStatus),
}

type Handler = Arc<dyn Fn(Bytes) -> BoxFuture<'static, Result<Bytes, RpcStatus>> + Send + Sync>;

/// Server object that service handlers are attached to before serving
#[derive(Default)]
pub struct RpcServer {
    handlers: HashMap<String, Handler>,
}

impl RpcServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a handler for `method`, replacing any previous one
    pub fn add_method<F, Fut>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes, RpcStatus>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |payload| handler(payload).boxed());
        self.handlers.insert(method.into(), handler);
    }

    /// Names of attached methods
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }

    /// Accept connections on `listener` until `shutdown` turns true.
    ///
    /// Open connections are then asked to close; each one finishes its
    /// in-flight request first.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> io::Result<()> {
        let handlers = Arc::new(self.handlers);
        let local_addr = listener.local_addr()?;
        info!("RPC server listening on {}", local_addr);

        loop {
            tokio::select! {
                _ = flag_raised(&mut shutdown) => {
                    info!("RPC server on {} stopped accepting", local_addr);
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let handlers = handlers.clone();
                        let mut closing = shutdown.clone();
                        tokio::task::spawn(async move {
                            let service = service_fn(move |req| dispatch(handlers.clone(), req));
                            let conn = http1::Builder::new()
                                .serve_connection(TokioIo::new(stream), service);
                            tokio::pin!(conn);

                            let mut draining = false;
                            loop {
                                tokio::select! {
                                    result = conn.as_mut() => {
                                        if let Err(e) = result {
                                            debug!("Error serving RPC connection from {}: {}", peer_addr, e);
                                        }
                                        break;
                                    }
                                    _ = flag_raised(&mut closing), if !draining => {
                                        draining = true;
                                        conn.as_mut().graceful_shutdown();
                                    }
                                }
                            }
                        });
                    }
                    Err(e) => backoff_after_accept_error("RPC", e).await,
                }
            }
        }
    }
}

/// Pause after a failed accept before polling the listener again
pub(crate) const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub(crate) async fn backoff_after_accept_error(kind: &str, error: io::Error) {
    warn!("Error accepting {} connection: {}", kind, error);
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

async fn dispatch(
    handlers: Arc<HashMap<String, Handler>>,
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    debug!("{} {}", req.method(), path);

    if req.method() != Method::POST {
        return Ok(status_response(&RpcStatus::new(
            StatusCode::METHOD_NOT_ALLOWED.as_u16(),
            "RPC calls must use POST",
        )));
    }

    let handler = match path
        .strip_prefix(RPC_PATH_PREFIX)
        .and_then(|method| handlers.get(method))
    {
        Some(handler) => handler.clone(),
        None => {
            return Ok(status_response(&RpcStatus::not_found(format!(
                "unknown method: {}",
                path
            ))))
        }
    };

    let payload = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return Ok(status_response(&RpcStatus::invalid_argument(format!(
                "failed to read request body: {}",
                e
            ))))
        }
    };

    match handler(payload).await {
        Ok(reply) => Ok(Response::new(Full::new(reply))),
        Err(status) => Ok(status_response(&status)),
    }
}

fn status_response(status: &RpcStatus) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(status.message.clone())));
    *response.status_mut() =
        StatusCode::from_u16(status.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response
}

/// Opens connections to RPC servers
#[async_trait]
pub trait Transport: Send + Sync {
    type Connection: Send;

    /// Connect to `address` (`host:port`)
    async fn connect(&self, address: &str) -> Result<Self::Connection, TransportError>;
}

/// Plain-text HTTP/1.1 transport
pub struct HttpTransport {
    connect_timeout: Duration,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    type Connection = RpcConnection;

    async fn connect(&self, address: &str) -> Result<RpcConnection, TransportError> {
        let stream = match tokio_timeout(self.connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(TransportError::Connect {
                    address: address.to_string(),
                    source,
                })
            }
            Err(_) => return Err(TransportError::ConnectTimeout(address.to_string())),
        };

        let (sender, connection) = client_http1::handshake(TokioIo::new(stream)).await?;
        let peer = address.to_string();
        tokio::task::spawn(async move {
            if let Err(e) = connection.await {
                debug!("RPC connection to {} closed with error: {}", peer, e);
            }
        });

        debug!("Connected to {}", address);
        Ok(RpcConnection {
            address: address.to_string(),
            sender,
        })
    }
}

/// Client side of one RPC connection
pub struct RpcConnection {
    address: String,
    sender: client_http1::SendRequest<Full<Bytes>>,
}

impl RpcConnection {
    /// Address this connection was opened to
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Invoke `method` with `payload` and wait for the reply
    pub async fn call(
        &mut self,
        method: &str,
        payload: impl Into<Bytes>,
    ) -> Result<Bytes, TransportError> {
        self.sender.ready().await?;

        let mut request = Request::new(Full::new(payload.into()));
        *request.method_mut() = Method::POST;
        *request.uri_mut() = format!("{}{}", RPC_PATH_PREFIX, method)
            .parse::<hyper::Uri>()
            .map_err(|e| TransportError::InvalidRequest(format!("{}", e)))?;
        let host = self
            .address
            .parse::<header::HeaderValue>()
            .map_err(|e| TransportError::InvalidRequest(format!("{}", e)))?;
        request.headers_mut().insert(header::HOST, host);

        let response = self.sender.send_request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();

        if status.is_success() {
            Ok(body)
        } else {
            Err(RpcStatus::new(status.as_u16(), String::from_utf8_lossy(&body)).into())
        }
    }
}
