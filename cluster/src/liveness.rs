use crate::client::PeerClient;
use crate::manager::ClusterManager;
use chrono::Utc;
use evcache_common::HeartbeatRequest;
use std::sync::Arc;
use tracing::debug;

/// Heartbeat every peer on the configured interval and feed the results into
/// the manager's reachability view. Runs one sweep immediately on startup and
/// holds the first election once that sweep completes, so a rejoining node
/// learns about a sitting leader before claiming the role itself.
pub async fn run_liveness(manager: Arc<ClusterManager>, client: Arc<PeerClient>) {
    let mut ticker = tokio::time::interval(manager.config().heartbeat_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut first_sweep = true;

    loop {
        ticker.tick().await;
        sweep(&manager, &client).await;
        if first_sweep {
            manager.run_election();
            first_sweep = false;
        }
    }
}

/// Ping every peer concurrently. Each call is independently bounded by the
/// client timeout; one slow peer never delays the others.
async fn sweep(manager: &Arc<ClusterManager>, client: &Arc<PeerClient>) {
    let request = HeartbeatRequest {
        from_node_id: manager.node_id().to_string(),
        is_leader: manager.is_leader(),
        timestamp: Utc::now(),
    };

    let mut handles = Vec::new();
    for peer in manager.peer_configs() {
        let manager = manager.clone();
        let client = client.clone();
        let request = request.clone();
        handles.push(tokio::spawn(async move {
            match client.heartbeat(&peer, &request).await {
                Ok(response) => {
                    manager.record_heartbeat_response(&response);
                }
                Err(err) => {
                    debug!("Heartbeat to {} failed: {}", peer.id, err);
                    manager.mark_peer_unreachable(&peer.id);
                }
            }
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}
