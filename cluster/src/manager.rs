use crate::types::*;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use evcache_common::{HeartbeatRequest, HeartbeatResponse, ServerId};
use metrics::{counter, gauge};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Tracks the peer set, this node's role and the current leader.
///
/// The election rule is deliberately simple: of all reachable nodes (self
/// included), the lexicographically smallest id leads. Every node applies the
/// rule to its own view, so partitions can produce two leaders; the conflict
/// is resolved when heartbeats cross and the larger id steps down.
pub struct ClusterManager {
    node_id: ServerId,
    peers: DashMap<ServerId, PeerState>,
    role: RwLock<NodeRole>,
    current_leader: RwLock<Option<ServerId>>,
    last_leader_seen: RwLock<DateTime<Utc>>,
    /// Shared with the gateway, which gates external publication on it.
    is_leader_flag: Arc<AtomicBool>,
    config: ClusterConfig,
}

impl ClusterManager {
    pub fn new(config: ClusterConfig, is_leader_flag: Arc<AtomicBool>) -> Self {
        let peers = DashMap::new();
        for peer in &config.peers {
            peers.insert(peer.id.clone(), PeerState::new(peer.clone()));
        }
        is_leader_flag.store(false, Ordering::SeqCst);
        Self {
            node_id: config.node_id.clone(),
            peers,
            role: RwLock::new(NodeRole::Candidate),
            current_leader: RwLock::new(None),
            last_leader_seen: RwLock::new(Utc::now()),
            is_leader_flag,
            config,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn role(&self) -> NodeRole {
        *self.role.read()
    }

    pub fn is_leader(&self) -> bool {
        self.role() == NodeRole::Leader
    }

    pub fn current_leader(&self) -> Option<ServerId> {
        self.current_leader.read().clone()
    }

    pub fn peer_configs(&self) -> Vec<PeerConfig> {
        self.peers
            .iter()
            .map(|entry| entry.value().config.clone())
            .collect()
    }

    /// Elect the lexicographically smallest reachable node, counting self.
    pub fn run_election(&self) {
        counter!("evcache.cluster.elections").increment(1);
        let mut winner = self.node_id.clone();
        for entry in self.peers.iter() {
            if entry.value().reachable && *entry.key() < winner {
                winner = entry.key().clone();
            }
        }

        if winner == self.node_id {
            self.transition(NodeRole::Leader, Some(winner));
        } else {
            self.transition(NodeRole::Follower, Some(winner));
        }
        // Fresh grace period for the elected leader.
        *self.last_leader_seen.write() = Utc::now();
    }

    /// Handle an inbound heartbeat from a peer. Always answered; the sender
    /// learns our id and whether we claim leadership.
    pub fn observe_heartbeat(&self, request: &HeartbeatRequest) -> HeartbeatResponse {
        self.mark_peer_reachable(&request.from_node_id);
        if request.is_leader {
            self.observe_leader_claim(&request.from_node_id);
        }
        HeartbeatResponse {
            node_id: self.node_id.clone(),
            is_leader: self.is_leader(),
            timestamp: Utc::now(),
        }
    }

    /// Handle a response to one of our outbound heartbeats.
    pub fn record_heartbeat_response(&self, response: &HeartbeatResponse) {
        self.mark_peer_reachable(&response.node_id);
        if response.is_leader {
            self.observe_leader_claim(&response.node_id);
        }
    }

    pub fn mark_peer_reachable(&self, id: &str) {
        if let Some(mut entry) = self.peers.get_mut(id) {
            if !entry.reachable {
                info!("Peer {} is reachable", id);
            }
            entry.reachable = true;
            entry.last_seen = Some(Utc::now());
        }
        self.update_reachability_gauge();
    }

    /// Mark a peer down. Losing the current leader triggers an immediate
    /// election instead of waiting out the heartbeat timeout.
    pub fn mark_peer_unreachable(&self, id: &str) {
        let mut was_reachable = false;
        if let Some(mut entry) = self.peers.get_mut(id) {
            was_reachable = entry.reachable;
            entry.reachable = false;
        }
        if was_reachable {
            warn!("Peer {} became unreachable", id);
        }
        self.update_reachability_gauge();

        let leader_lost = self.current_leader.read().as_deref() == Some(id);
        if leader_lost {
            warn!("Leader {} is unreachable, starting election", id);
            self.transition(NodeRole::Candidate, None);
            self.run_election();
        }
    }

    /// True when a follower has gone too long without evidence of a leader.
    pub fn leader_timed_out(&self) -> bool {
        if self.is_leader() {
            return false;
        }
        let elapsed = Utc::now() - *self.last_leader_seen.read();
        elapsed.num_seconds() >= self.config.leader_timeout_secs as i64
    }

    /// Re-elect if the leader heartbeat has timed out. Called periodically
    /// by the watchdog loop.
    pub fn check_leader_timeout(&self) {
        if self.leader_timed_out() {
            warn!(
                "No leader heartbeat for {}s, starting election",
                self.config.leader_timeout_secs
            );
            self.transition(NodeRole::Candidate, None);
            self.run_election();
        }
    }

    pub fn status(&self) -> ClusterStatus {
        let mut peers: Vec<PeerSnapshot> = self
            .peers
            .iter()
            .map(|entry| PeerSnapshot {
                id: entry.value().config.id.clone(),
                base_url: entry.value().config.base_url.clone(),
                reachable: entry.value().reachable,
                last_seen: entry.value().last_seen,
            })
            .collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        ClusterStatus {
            node_id: self.node_id.clone(),
            role: self.role(),
            leader: self.current_leader(),
            peers,
        }
    }

    /// Periodic watchdog: followers re-elect after the leader timeout.
    pub async fn run_leader_watchdog(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval() / 3);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.check_leader_timeout();
        }
    }

    fn observe_leader_claim(&self, claimant: &str) {
        if self.is_leader() {
            if claimant < self.node_id.as_str() {
                // Two leaders after a partition heals: the larger id yields.
                warn!("Stepping down: {} claims leadership with a smaller id", claimant);
                self.transition(NodeRole::Follower, Some(claimant.to_string()));
            } else {
                warn!(
                    "Ignoring leader claim from {}; it will step down on our heartbeat",
                    claimant
                );
                return;
            }
        } else {
            let known = self.current_leader.read().clone();
            if known.as_deref() != Some(claimant) {
                info!("Following leader {}", claimant);
            }
            self.transition(NodeRole::Follower, Some(claimant.to_string()));
        }
        *self.last_leader_seen.write() = Utc::now();
    }

    fn transition(&self, role: NodeRole, leader: Option<ServerId>) {
        let previous = {
            let mut current = self.role.write();
            let previous = *current;
            *current = role;
            previous
        };
        if previous != role {
            info!(
                "Role transition: {} -> {} (leader: {})",
                previous,
                role,
                leader.as_deref().unwrap_or("unknown")
            );
        }
        self.is_leader_flag.store(role == NodeRole::Leader, Ordering::SeqCst);
        *self.current_leader.write() = leader;
    }

    fn update_reachability_gauge(&self) {
        let reachable = self
            .peers
            .iter()
            .filter(|entry| entry.value().reachable)
            .count();
        gauge!("evcache.cluster.reachable_peers").set(reachable as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(node_id: &str, peer_ids: &[&str]) -> ClusterManager {
        let config = ClusterConfig {
            node_id: node_id.to_string(),
            peers: peer_ids
                .iter()
                .map(|id| PeerConfig {
                    id: id.to_string(),
                    base_url: format!("http://{}:8080", id),
                })
                .collect(),
            ..Default::default()
        };
        ClusterManager::new(config, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn starts_as_candidate_without_leader() {
        let mgr = manager("n2", &["n1", "n3"]);
        assert_eq!(mgr.role(), NodeRole::Candidate);
        assert_eq!(mgr.current_leader(), None);
    }

    #[test]
    fn election_picks_smallest_reachable_id() {
        let mgr = manager("n2", &["n1", "n3"]);

        // Nobody reachable yet: we are the smallest live node.
        mgr.run_election();
        assert_eq!(mgr.role(), NodeRole::Leader);
        assert_eq!(mgr.current_leader(), Some("n2".to_string()));

        // n1 comes up and wins the next election.
        mgr.mark_peer_reachable("n1");
        mgr.run_election();
        assert_eq!(mgr.role(), NodeRole::Follower);
        assert_eq!(mgr.current_leader(), Some("n1".to_string()));
    }

    #[test]
    fn unreachable_smallest_node_is_skipped() {
        let mgr = manager("n2", &["n1", "n3"]);
        mgr.mark_peer_reachable("n1");
        mgr.mark_peer_reachable("n3");
        mgr.mark_peer_unreachable("n1");

        mgr.run_election();
        assert_eq!(mgr.role(), NodeRole::Leader);
        assert_eq!(mgr.current_leader(), Some("n2".to_string()));
    }

    #[test]
    fn losing_the_leader_reelects_immediately() {
        let mgr = manager("n2", &["n1", "n3"]);
        mgr.mark_peer_reachable("n1");
        mgr.mark_peer_reachable("n3");
        mgr.run_election();
        assert_eq!(mgr.current_leader(), Some("n1".to_string()));

        mgr.mark_peer_unreachable("n1");
        assert_eq!(mgr.role(), NodeRole::Leader);
        assert_eq!(mgr.current_leader(), Some("n2".to_string()));
    }

    #[test]
    fn leader_steps_down_for_smaller_claimant() {
        let mgr = manager("n2", &["n1", "n3"]);
        mgr.run_election();
        assert!(mgr.is_leader());

        let response = mgr.observe_heartbeat(&HeartbeatRequest {
            from_node_id: "n1".to_string(),
            is_leader: true,
            timestamp: Utc::now(),
        });
        assert_eq!(mgr.role(), NodeRole::Follower);
        assert_eq!(mgr.current_leader(), Some("n1".to_string()));
        assert!(!response.is_leader);
    }

    #[test]
    fn leader_ignores_claim_from_larger_id() {
        let mgr = manager("n2", &["n1", "n3"]);
        mgr.run_election();
        assert!(mgr.is_leader());

        let response = mgr.observe_heartbeat(&HeartbeatRequest {
            from_node_id: "n3".to_string(),
            is_leader: true,
            timestamp: Utc::now(),
        });
        assert!(mgr.is_leader());
        assert!(response.is_leader);
    }

    #[test]
    fn heartbeat_marks_sender_reachable_and_refreshes_leader() {
        let mgr = manager("n2", &["n1", "n3"]);
        mgr.observe_heartbeat(&HeartbeatRequest {
            from_node_id: "n1".to_string(),
            is_leader: true,
            timestamp: Utc::now(),
        });

        assert_eq!(mgr.role(), NodeRole::Follower);
        assert_eq!(mgr.current_leader(), Some("n1".to_string()));
        assert!(!mgr.leader_timed_out());

        let status = mgr.status();
        let n1 = status.peers.iter().find(|p| p.id == "n1").unwrap();
        assert!(n1.reachable);
    }

    #[test]
    fn heartbeat_response_updates_view_like_a_request() {
        let mgr = manager("n3", &["n1", "n2"]);
        mgr.record_heartbeat_response(&HeartbeatResponse {
            node_id: "n1".to_string(),
            is_leader: true,
            timestamp: Utc::now(),
        });
        assert_eq!(mgr.current_leader(), Some("n1".to_string()));
    }

    #[test]
    fn leader_heartbeat_timeout_triggers_reelection() {
        let config = ClusterConfig {
            node_id: "n2".to_string(),
            peers: vec![PeerConfig {
                id: "n3".to_string(),
                base_url: "http://n3:8080".to_string(),
            }],
            leader_timeout_secs: 0,
            ..Default::default()
        };
        let mgr = ClusterManager::new(config, Arc::new(AtomicBool::new(false)));

        mgr.observe_heartbeat(&HeartbeatRequest {
            from_node_id: "n3".to_string(),
            is_leader: true,
            timestamp: Utc::now(),
        });
        assert_eq!(mgr.role(), NodeRole::Follower);
        assert_eq!(mgr.current_leader(), Some("n3".to_string()));

        // The leader goes silent past the timeout; the node re-elects among
        // the peers it can still reach and takes over as the smallest id.
        mgr.check_leader_timeout();
        assert_eq!(mgr.role(), NodeRole::Leader);
        assert_eq!(mgr.current_leader(), Some("n2".to_string()));
    }

    #[test]
    fn leader_never_times_itself_out() {
        let mgr = manager("n1", &["n2"]);
        mgr.run_election();
        assert!(mgr.is_leader());
        assert!(!mgr.leader_timed_out());
        mgr.check_leader_timeout();
        assert!(mgr.is_leader());
    }

    #[test]
    fn stable_three_node_cluster_agrees_on_one_leader() {
        let n1 = manager("n1", &["n2", "n3"]);
        let n2 = manager("n2", &["n1", "n3"]);
        let n3 = manager("n3", &["n1", "n2"]);

        for mgr in [&n1, &n2, &n3] {
            for peer in mgr.peer_configs() {
                mgr.mark_peer_reachable(&peer.id);
            }
            mgr.run_election();
        }

        assert!(n1.is_leader());
        assert!(!n2.is_leader());
        assert!(!n3.is_leader());
        for mgr in [&n1, &n2, &n3] {
            assert_eq!(mgr.current_leader(), Some("n1".to_string()));
        }
    }

    #[test]
    fn leadership_flag_is_shared() {
        let flag = Arc::new(AtomicBool::new(false));
        let config = ClusterConfig {
            node_id: "n1".to_string(),
            ..Default::default()
        };
        let mgr = ClusterManager::new(config, flag.clone());
        mgr.run_election();
        assert!(flag.load(Ordering::SeqCst));
    }
}
