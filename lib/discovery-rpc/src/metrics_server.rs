//! HTTP exposition of discovery metrics on a listener of its own

use crate::metrics::DiscoveryMetrics;
use crate::signal::flag_raised;
use crate::transport::backoff_after_accept_error;
use http_body_util::Full;
use hyper::{body::Bytes, header, server::conn::http1, service::service_fn, Method, Request, Response, StatusCode};
use hyper_util::rt::tokio::TokioIo;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Serves `/metrics` and `/healthz`
pub struct MetricsServer {
    listener: TcpListener,
    metrics: Arc<DiscoveryMetrics>,
}

impl MetricsServer {
    pub async fn bind(addr: SocketAddr, metrics: Arc<DiscoveryMetrics>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, metrics })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept scrapes until `shutdown` turns true
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("Metrics server listening on {}", addr);
        }

        loop {
            tokio::select! {
                _ = flag_raised(&mut shutdown) => {
                    debug!("Metrics server stopped");
                    return;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let metrics = self.metrics.clone();
                        tokio::task::spawn(async move {
                            let service = service_fn(move |req| handle_request(req, metrics.clone()));
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(TokioIo::new(stream), service)
                                .await
                            {
                                debug!("Error serving metrics connection from {}: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => backoff_after_accept_error("metrics", e).await,
                }
            }
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<DiscoveryMetrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => match metrics.gather() {
            Ok(text) => {
                let mut response = Response::new(Full::new(Bytes::from(text)));
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    header::HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            Err(e) => {
                warn!("Failed to gather metrics: {}", e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to gather metrics\n")
            }
        },
        (_, "/healthz") => text_response(StatusCode::OK, "OK\n"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found\n"),
    };
    Ok(response)
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}
