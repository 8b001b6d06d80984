//! Cluster layer: static peer membership, lowest-id leader election, peer
//! liveness heartbeats, best-effort push and anti-entropy pull sync.

pub mod client;
pub mod liveness;
pub mod manager;
pub mod push;
pub mod sync;
pub mod types;

pub use client::PeerClient;
pub use manager::ClusterManager;
pub use sync::Synchronizer;
pub use types::{ClusterConfig, ClusterStatus, NodeRole, PeerConfig, PeerSnapshot};

use evcache_common::Result;
use evcache_gateway::EventGateway;
use std::sync::Arc;

/// Spawn all cluster background tasks: liveness sweeps, the leader watchdog,
/// the mutation pusher and the synchronizer. Returns the synchronizer handle
/// so the server can expose its cursors.
pub fn start(
    manager: Arc<ClusterManager>,
    gateway: Arc<EventGateway>,
    peer_token: String,
) -> Result<Arc<Synchronizer>> {
    let client = Arc::new(PeerClient::new(
        peer_token,
        manager.config().peer_timeout(),
    )?);

    let synchronizer = Arc::new(Synchronizer::new(
        gateway.clone(),
        manager.clone(),
        client.clone(),
    ));

    tokio::spawn(liveness::run_liveness(manager.clone(), client.clone()));
    tokio::spawn(manager.clone().run_leader_watchdog());
    tokio::spawn(push::run_pusher(gateway, manager, client));
    tokio::spawn(synchronizer.clone().run());

    Ok(synchronizer)
}
