mod auth;
mod config;
mod health;
mod rest;

use anyhow::Result;
use clap::Parser;
use evcache_cache::BoundedCache;
use evcache_cluster::ClusterManager;
use evcache_gateway::EventGateway;
use metrics_exporter_prometheus::PrometheusBuilder;
use rest::AppState;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "evcache-server")]
#[command(about = "Peer-replicated event cache node")]
struct Args {
    /// Path to a YAML config file; environment variables override it
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listen port from config
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut node_config = config::NodeConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        node_config.server.port = port;
    }

    info!(
        "Starting evcache node {} on {} with {} peers",
        node_config.cluster.node_id,
        node_config.listen_addr(),
        node_config.cluster.peers.len()
    );

    let metrics_handle = PrometheusBuilder::new().install_recorder()?;

    let is_leader = Arc::new(AtomicBool::new(false));
    let cache = Arc::new(BoundedCache::new(node_config.cache.max_bytes));
    let gateway = Arc::new(EventGateway::new(
        node_config.cluster.node_id.clone(),
        cache,
        is_leader.clone(),
    ));
    let manager = Arc::new(ClusterManager::new(node_config.cluster_config(), is_leader));
    let synchronizer = evcache_cluster::start(
        manager.clone(),
        gateway.clone(),
        node_config.auth.peer_token.clone(),
    )?;

    let state = AppState {
        gateway: gateway.clone(),
        manager,
        synchronizer,
        peer_token: node_config.auth.peer_token.clone(),
        started_at: Instant::now(),
    };

    let app = rest::create_router(state).route(
        "/metrics",
        axum::routing::get(move || {
            let handle = metrics_handle.clone();
            async move { handle.render() }
        }),
    );

    let listener = tokio::net::TcpListener::bind(node_config.listen_addr()).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(gateway))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Wait for ctrl-c, then stop accepting mutations. In-flight peer calls
/// drain on their own timeouts.
async fn shutdown_signal(gateway: Arc<EventGateway>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        return;
    }
    info!("Shutdown signal received");
    gateway.stop_accepting();
}
