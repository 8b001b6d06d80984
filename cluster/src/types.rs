use chrono::{DateTime, Utc};
use evcache_common::ServerId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cluster configuration. The peer set is static for the life of the process;
/// membership changes mean a config change and a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub node_id: ServerId,
    pub peers: Vec<PeerConfig>,
    pub heartbeat_interval_secs: u64,
    pub leader_timeout_secs: u64,
    pub sync_interval_secs: u64,
    pub sync_page_limit: usize,
    pub peer_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            peers: Vec::new(),
            heartbeat_interval_secs: 15,
            leader_timeout_secs: 30,
            sync_interval_secs: 30,
            sync_page_limit: 100,
            peer_timeout_secs: 4,
        }
    }
}

impl ClusterConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn leader_timeout(&self) -> Duration {
        Duration::from_secs(self.leader_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }
}

/// Role of a node in the peer set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    /// Startup or election in progress; no leader known yet.
    Candidate,

    /// This node coordinates external publication.
    Leader,

    /// Another node leads; this node tracks its heartbeats.
    Follower,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Candidate => write!(f, "Candidate"),
            NodeRole::Leader => write!(f, "Leader"),
            NodeRole::Follower => write!(f, "Follower"),
        }
    }
}

/// Static address of one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: ServerId,
    /// Base URL including scheme and port, e.g. `http://10.0.0.2:8080`.
    pub base_url: String,
}

/// Liveness bookkeeping for one peer.
#[derive(Debug, Clone)]
pub(crate) struct PeerState {
    pub config: PeerConfig,
    pub reachable: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl PeerState {
    pub fn new(config: PeerConfig) -> Self {
        Self {
            config,
            reachable: false,
            last_seen: None,
        }
    }
}

/// Point-in-time view of one peer, for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PeerSnapshot {
    pub id: ServerId,
    pub base_url: String,
    pub reachable: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Point-in-time view of the whole cluster from this node.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub node_id: ServerId,
    pub role: NodeRole,
    pub leader: Option<ServerId>,
    pub peers: Vec<PeerSnapshot>,
}
