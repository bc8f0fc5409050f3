use anyhow::{bail, Context, Result};
use discovery_consul::{ConsulConfig, ConsulRegistry};
use discovery_rpc::{
    Connector, Discovery, DiscoveryMetrics, HttpTransport, InstrumentationSink, MetricsServer,
    NodeSelector, RandomSource, RpcStatus, Server, ServerConfig,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::init as tracing_init;

const USAGE: &str = "usage: echo-service serve <name> | echo-service call <name> <message>";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["serve", name] => serve(name).await,
        ["call", name, message] => call(name, message).await,
        _ => bail!(USAGE),
    }
}

fn build_discovery(sink: Arc<dyn InstrumentationSink>) -> Result<Arc<Discovery>> {
    let consul = ConsulConfig::from_env();
    info!("Using registry agent at {}", consul.base_url());
    let registry = ConsulRegistry::new(consul).context("failed to create registry client")?;

    Ok(Arc::new(Discovery::new(
        Arc::new(registry),
        sink,
        NodeSelector::new(RandomSource::from_entropy()),
    )))
}

async fn serve(name: &str) -> Result<()> {
    info!("Starting echo-service {}...", name);

    let config = ServerConfig::from_env();
    let metrics = Arc::new(DiscoveryMetrics::new().context("failed to create metrics")?);
    let discovery = build_discovery(metrics.clone())?;
    let server = Arc::new(Server::new(discovery, &config, RandomSource::from_entropy()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Some(addr) = config.metrics_addr {
        let metrics_server = MetricsServer::bind(addr, metrics.clone())
            .await
            .with_context(|| format!("failed to bind metrics listener on {}", addr))?;
        tokio::spawn(metrics_server.serve(shutdown_rx));
    }

    let mut serving = {
        let server = server.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            server
                .serve(&name, |rpc| {
                    rpc.add_method("echo", |payload| async move { Ok::<_, RpcStatus>(payload) });
                })
                .await
        })
    };

    tokio::select! {
        result = &mut serving => {
            shutdown_tx.send_replace(true);
            result?.with_context(|| format!("echo-service {} failed to start", name))?;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received, stopping...");
        }
    }

    if let Err(e) = server.stop().await {
        error!("Error during shutdown: {}", e);
    }
    shutdown_tx.send_replace(true);
    serving.await??;

    info!("echo-service {} stopped", name);
    Ok(())
}

async fn call(name: &str, message: &str) -> Result<()> {
    let config = ServerConfig::from_env();
    let metrics = Arc::new(DiscoveryMetrics::new().context("failed to create metrics")?);
    let discovery = build_discovery(metrics)?;
    let connector = Connector::new(discovery, HttpTransport::new(config.connect_timeout));

    let mut connection = connector
        .dial(name)
        .await
        .with_context(|| format!("failed to dial {}", name))?;
    let reply = connection
        .call("echo", message.to_string())
        .await
        .context("echo call failed")?;

    println!("{}", String::from_utf8_lossy(&reply));
    Ok(())
}
