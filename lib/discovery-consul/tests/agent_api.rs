//! Exercises ConsulRegistry against an in-process fake agent

use discovery_consul::api::{AgentService, CatalogNode, ServiceEntry, ServiceRegistration};
use discovery_consul::{ConsulConfig, ConsulRegistry};
use discovery_core::{DiscoveryError, Registry};
use http_body_util::{BodyExt, Full};
use hyper::{body::Bytes, server::conn::http1, service::service_fn, Method, Request, Response, StatusCode};
use hyper_util::rt::tokio::TokioIo;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Default)]
struct FakeAgent {
    // service id -> registration
    services: Mutex<HashMap<String, ServiceRegistration>>,
    health_queries: Mutex<Vec<String>>,
}

impl FakeAgent {
    fn agent_services(&self) -> HashMap<String, AgentService> {
        self.services
            .lock()
            .unwrap()
            .iter()
            .map(|(id, reg)| {
                (
                    id.clone(),
                    AgentService {
                        id: id.clone(),
                        service: reg.name.clone(),
                        address: String::new(),
                        port: reg.port,
                    },
                )
            })
            .collect()
    }

    fn health_entries(&self, name: &str) -> Vec<ServiceEntry> {
        self.agent_services()
            .into_values()
            .filter(|s| s.service == name)
            .map(|service| ServiceEntry {
                node: CatalogNode {
                    node: "agent-one".to_string(),
                    address: "127.0.0.1".to_string(),
                },
                service,
            })
            .collect()
    }
}

fn json_response<T: serde::Serialize>(value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap();
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

async fn handle(
    agent: Arc<FakeAgent>,
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or_default().to_string();

    let response = match (method, path.as_str()) {
        (Method::GET, "/v1/agent/services") => json_response(&agent.agent_services()),
        (Method::GET, p) if p.starts_with("/v1/health/service/") => {
            let name = urlencoding::decode(&p["/v1/health/service/".len()..]).unwrap();
            agent.health_queries.lock().unwrap().push(query);
            json_response(&agent.health_entries(&name))
        }
        (Method::PUT, "/v1/agent/service/register") => {
            let body = req.into_body().collect().await.unwrap().to_bytes();
            let registration: ServiceRegistration = serde_json::from_slice(&body).unwrap();
            agent
                .services
                .lock()
                .unwrap()
                .insert(registration.id.clone(), registration);
            status_response(StatusCode::OK)
        }
        (Method::PUT, p) if p.starts_with("/v1/agent/service/deregister/") => {
            let id = urlencoding::decode(&p["/v1/agent/service/deregister/".len()..]).unwrap();
            match agent.services.lock().unwrap().remove(id.as_ref()) {
                Some(_) => status_response(StatusCode::OK),
                None => status_response(StatusCode::NOT_FOUND),
            }
        }
        _ => status_response(StatusCode::NOT_FOUND),
    };
    Ok(response)
}

async fn spawn_agent() -> (SocketAddr, Arc<FakeAgent>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let agent = Arc::new(FakeAgent::default());

    let shared = agent.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            let agent = shared.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| handle(agent.clone(), req));
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (addr, agent)
}

fn registry_for(addr: SocketAddr) -> ConsulRegistry {
    ConsulRegistry::new(ConsulConfig {
        address: addr.to_string(),
        timeout: Duration::from_secs(2),
    })
    .unwrap()
}

#[tokio::test]
async fn test_register_then_list_local_services() {
    let (addr, _agent) = spawn_agent().await;
    let registry = registry_for(addr);

    registry.register("svc-a", 6000).await.unwrap();

    let local = registry.local_services().await.unwrap();
    assert!(local
        .iter()
        .any(|r| r.name == "svc-a" && r.node.port == 6000));

    registry.deregister("svc-a").await.unwrap();
    let local = registry.local_services().await.unwrap();
    assert!(!local.iter().any(|r| r.name == "svc-a"));
}

#[tokio::test]
async fn test_register_is_idempotent() {
    let (addr, agent) = spawn_agent().await;
    let registry = registry_for(addr);

    registry.register("svc-a", 6000).await.unwrap();
    registry.register("svc-a", 6000).await.unwrap();

    let local = registry.local_services().await.unwrap();
    assert_eq!(local.iter().filter(|r| r.name == "svc-a").count(), 1);
    assert_eq!(agent.services.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_healthy_instances_requests_passing_only() {
    let (addr, agent) = spawn_agent().await;
    let registry = registry_for(addr);

    registry.register("svc-c", 7001).await.unwrap();
    let nodes = registry.healthy_instances("svc-c").await.unwrap();

    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].address, "127.0.0.1");
    assert_eq!(nodes[0].port, 7001);
    assert_eq!(
        agent.health_queries.lock().unwrap().as_slice(),
        ["passing=true".to_string()]
    );
}

#[tokio::test]
async fn test_healthy_instances_empty_is_not_an_error() {
    let (addr, _agent) = spawn_agent().await;
    let registry = registry_for(addr);

    let nodes = registry.healthy_instances("nobody").await.unwrap();
    assert!(nodes.is_empty());
}

#[tokio::test]
async fn test_deregister_unknown_service_is_ok() {
    let (addr, _agent) = spawn_agent().await;
    let registry = registry_for(addr);

    assert!(registry.deregister("never-registered").await.is_ok());
}

#[tokio::test]
async fn test_reserved_characters_in_service_names() {
    let (addr, agent) = spawn_agent().await;
    let registry = registry_for(addr);
    let names = ["svc?a", "svc#a", "team/svc", "50%off"];

    for (port, name) in (6100..).zip(names) {
        registry.register(name, port).await.unwrap();
    }

    for (port, name) in (6100..).zip(names) {
        let nodes = registry.healthy_instances(name).await.unwrap();
        assert_eq!(nodes.len(), 1, "instances of {}", name);
        assert_eq!(nodes[0].port, port);
    }
    assert!(agent
        .health_queries
        .lock()
        .unwrap()
        .iter()
        .all(|q| q == "passing=true"));

    for name in names {
        registry.deregister(name).await.unwrap();
    }
    assert!(agent.services.lock().unwrap().is_empty());
    assert!(registry.local_services().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_agent() {
    // Nothing listens on the discard port of the loopback interface
    let registry = ConsulRegistry::new(ConsulConfig {
        address: "127.0.0.1:9".to_string(),
        timeout: Duration::from_millis(500),
    })
    .unwrap();

    assert!(matches!(
        registry.local_services().await,
        Err(DiscoveryError::RegistryUnavailable(_))
    ));
    assert!(matches!(
        registry.healthy_instances("svc").await,
        Err(DiscoveryError::RegistryUnavailable(_))
    ));
    assert!(matches!(
        registry.register("svc", 6000).await,
        Err(DiscoveryError::RegistrationFailed { .. })
    ));
    assert!(matches!(
        registry.deregister("svc").await,
        Err(DiscoveryError::DeregistrationFailed { .. })
    ));
}
