use crate::rest::AppState;
use axum::{extract::State, http::StatusCode, response::Json};
use evcache_cluster::NodeRole;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::instrument;

/// Health check status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    fn to_http_status(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Degraded => StatusCode::OK, // Still accepting traffic
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Component health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub timestamp: u64,
}

impl ComponentHealth {
    fn healthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: Some(message.into()),
            timestamp: current_timestamp(),
        }
    }

    fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            timestamp: current_timestamp(),
        }
    }
}

/// Overall health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
}

/// Readiness check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub timestamp: u64,
}

/// Liveness check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub alive: bool,
    pub timestamp: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Liveness probe: the process is up and serving.
#[instrument]
pub async fn health_liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        alive: true,
        timestamp: current_timestamp(),
    })
}

/// Readiness probe: ready once the cache is addressable. Candidates without
/// a leader still serve reads and local mutations, so role never gates
/// readiness.
#[instrument(skip(state))]
pub async fn health_readiness(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let ready = state.gateway.cache().max_bytes() > 0;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready,
            timestamp: current_timestamp(),
        }),
    )
}

/// Deep health check: cache pressure, cluster view, uptime.
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let mut components = Vec::new();
    let mut overall = HealthStatus::Healthy;

    let cache_stats = state.gateway.cache().stats();
    let cache_message = format!(
        "{} entries, {}/{} bytes ({:.1}%)",
        cache_stats.entries, cache_stats.total_bytes, cache_stats.max_bytes,
        cache_stats.usage_percent
    );
    if cache_stats.usage_percent >= 90.0 {
        overall = HealthStatus::Degraded;
        components.push(ComponentHealth::degraded("cache", cache_message));
    } else {
        components.push(ComponentHealth::healthy("cache", cache_message));
    }

    let cluster = state.manager.status();
    let reachable = cluster.peers.iter().filter(|p| p.reachable).count();
    let cluster_message = format!(
        "role {}, leader {}, {}/{} peers reachable",
        cluster.role,
        cluster.leader.as_deref().unwrap_or("unknown"),
        reachable,
        cluster.peers.len()
    );
    if cluster.role == NodeRole::Candidate || (!cluster.peers.is_empty() && reachable == 0) {
        // Isolated or mid-election: still serving locally, sync will heal.
        if overall == HealthStatus::Healthy {
            overall = HealthStatus::Degraded;
        }
        components.push(ComponentHealth::degraded("cluster", cluster_message));
    } else {
        components.push(ComponentHealth::healthy("cluster", cluster_message));
    }

    let uptime = state.started_at.elapsed().as_secs();
    components.push(ComponentHealth::healthy(
        "uptime",
        format!("{} seconds", uptime),
    ));

    let response = HealthResponse {
        status: overall,
        timestamp: current_timestamp(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        components,
    };
    (overall.to_http_status(), Json(response))
}
