use evcache_cluster::{ClusterConfig, PeerConfig};
use evcache_common::{EvCacheError, Result};
use serde::{Deserialize, Serialize};

/// Node configuration: defaults, overlaid by an optional YAML file, overlaid
/// by `EVCACHE_`-prefixed environment variables (`EVCACHE_SERVER__PORT=9000`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub server: ServerSection,
    pub cache: CacheSection,
    pub cluster: ClusterSection,
    pub auth: AuthSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub max_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    pub node_id: String,
    pub peers: Vec<PeerConfig>,
    pub heartbeat_interval_secs: u64,
    pub leader_timeout_secs: u64,
    pub sync_interval_secs: u64,
    pub sync_page_limit: usize,
    pub peer_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Shared secret checked on every `/internal/*` request.
    pub peer_token: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            cache: CacheSection::default(),
            cluster: ClusterSection::default(),
            auth: AuthSection::default(),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_bytes: evcache_cache::DEFAULT_MAX_BYTES,
        }
    }
}

impl Default for ClusterSection {
    fn default() -> Self {
        let defaults = ClusterConfig::default();
        Self {
            node_id: defaults.node_id,
            peers: Vec::new(),
            heartbeat_interval_secs: defaults.heartbeat_interval_secs,
            leader_timeout_secs: defaults.leader_timeout_secs,
            sync_interval_secs: defaults.sync_interval_secs,
            sync_page_limit: defaults.sync_page_limit,
            peer_timeout_secs: defaults.peer_timeout_secs,
        }
    }
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            peer_token: "change-me".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(std::path::Path::new(path)));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("EVCACHE")
                .separator("__")
                .try_parsing(true),
        );

        let loaded = builder
            .build()
            .map_err(|e| EvCacheError::Config(e.to_string()))?;
        let config: NodeConfig = loaded
            .try_deserialize()
            .map_err(|e| EvCacheError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            node_id: self.cluster.node_id.clone(),
            peers: self.cluster.peers.clone(),
            heartbeat_interval_secs: self.cluster.heartbeat_interval_secs,
            leader_timeout_secs: self.cluster.leader_timeout_secs,
            sync_interval_secs: self.cluster.sync_interval_secs,
            sync_page_limit: self.cluster.sync_page_limit,
            peer_timeout_secs: self.cluster.peer_timeout_secs,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.cluster.node_id.is_empty() {
            return Err(EvCacheError::Config("cluster.node_id is empty".to_string()));
        }
        if self.cache.max_bytes == 0 {
            return Err(EvCacheError::Config("cache.max_bytes is zero".to_string()));
        }
        for peer in &self.cluster.peers {
            if peer.id == self.cluster.node_id {
                return Err(EvCacheError::Config(format!(
                    "peer list contains this node's own id '{}'",
                    peer.id
                )));
            }
        }
        Ok(())
    }
}
