use crate::client::PeerClient;
use crate::manager::ClusterManager;
use evcache_gateway::EventGateway;
use metrics::counter;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Forward every locally applied mutation to all peers, best effort. A push
/// that fails is only logged; the periodic sync round carries the same data
/// and will deliver it eventually. Mutation callers never wait on this.
pub async fn run_pusher(
    gateway: Arc<EventGateway>,
    manager: Arc<ClusterManager>,
    client: Arc<PeerClient>,
) {
    let mut outbound = gateway.subscribe_outbound();
    loop {
        match outbound.recv().await {
            Ok(event) => {
                for peer in manager.peer_configs() {
                    let client = client.clone();
                    let event = event.clone();
                    tokio::spawn(async move {
                        match client.push_event(&peer, &event).await {
                            Ok(ack) => {
                                counter!("evcache.push.delivered").increment(1);
                                debug!(
                                    "Pushed {} to {} (applied: {})",
                                    event.id, peer.id, ack.applied
                                );
                            }
                            Err(err) => {
                                debug!("Push of {} to {} failed: {}", event.id, peer.id, err);
                            }
                        }
                    });
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                // Sync will re-deliver whatever the channel dropped.
                warn!("Push feed lagged, {} events skipped", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
