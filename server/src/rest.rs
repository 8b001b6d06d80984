use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, patch, post},
    Router,
};
use chrono::{DateTime, Utc};
use evcache_cluster::{ClusterManager, Synchronizer};
use evcache_common::{
    EvCacheError, Event, EventPatch, EventPayload, HeartbeatRequest, HeartbeatResponse, PushAck,
    ServerId, SyncPullResponse,
};
use evcache_gateway::EventGateway;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, instrument};

/// REST API response wrapper
#[derive(Serialize)]
#[serde(bound(serialize = "T: Serialize"))]
pub struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<EventGateway>,
    pub manager: Arc<ClusterManager>,
    pub synchronizer: Arc<Synchronizer>,
    pub peer_token: String,
    pub started_at: Instant,
}

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

fn ok<T: Serialize>(data: T) -> Reply<T> {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn fail<T: Serialize>(err: EvCacheError) -> Reply<T> {
    let status = match &err {
        EvCacheError::EventNotFound { .. } => StatusCode::NOT_FOUND,
        EvCacheError::CapacityExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        EvCacheError::AuthenticationFailed => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Request failed: {}", err);
    }
    (status, Json(ApiResponse::error(err.to_string())))
}

/// Like/unlike request body
#[derive(Deserialize, Debug)]
struct LikeRequest {
    is_liked: bool,
}

/// Feed query parameters
#[derive(Deserialize, Debug, Default)]
pub struct FeedParams {
    page: Option<usize>,
    limit: Option<usize>,
    city: Option<String>,
    category: Option<String>,
}

/// Feed page response
#[derive(Serialize, Debug)]
struct FeedResponse {
    events: Vec<Event>,
    page: usize,
    limit: usize,
    total: usize,
}

/// Sync-pull query parameters
#[derive(Deserialize, Debug)]
struct SyncParams {
    since: DateTime<Utc>,
    limit: Option<usize>,
}

/// Node statistics response
#[derive(Serialize, Debug)]
struct StatsResponse {
    node_id: ServerId,
    role: String,
    leader: Option<ServerId>,
    cache: CacheStatsBody,
    peers: Vec<evcache_cluster::PeerSnapshot>,
    sync_cursors: Vec<SyncCursorBody>,
}

#[derive(Serialize, Debug)]
struct CacheStatsBody {
    entries: usize,
    total_bytes: usize,
    max_bytes: usize,
    usage_percent: f64,
}

#[derive(Serialize, Debug)]
struct SyncCursorBody {
    peer_id: ServerId,
    cursor: DateTime<Utc>,
}

const DEFAULT_FEED_LIMIT: usize = 20;
const MAX_FEED_LIMIT: usize = 100;

/// Create event
#[instrument(skip(state, payload))]
async fn create_event(
    State(state): State<AppState>,
    Json(payload): Json<EventPayload>,
) -> Reply<Event> {
    match state.gateway.create_event(payload).await {
        Ok(event) => ok(event),
        Err(e) => fail(e),
    }
}

/// Get a single active event
#[instrument(skip(state))]
async fn get_event(State(state): State<AppState>, Path(id): Path<String>) -> Reply<Event> {
    match state.gateway.cache().get(&id) {
        Some(event) if !event.is_deleted() => ok(event),
        _ => fail(EvCacheError::EventNotFound { id }),
    }
}

/// Patch event fields
#[instrument(skip(state, patch))]
async fn update_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<EventPatch>,
) -> Reply<Event> {
    match state.gateway.update_event(&id, patch).await {
        Ok(event) => ok(event),
        Err(e) => fail(e),
    }
}

/// Delete (tombstone) an event
#[instrument(skip(state))]
async fn delete_event(State(state): State<AppState>, Path(id): Path<String>) -> Reply<String> {
    match state.gateway.delete_event(&id).await {
        Ok(()) => ok(format!("Event '{}' deleted", id)),
        Err(e) => fail(e),
    }
}

/// Like or unlike an event
#[instrument(skip(state))]
async fn like_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<LikeRequest>,
) -> Reply<Event> {
    match state.gateway.like_event(&id, request.is_liked).await {
        Ok(event) => ok(event),
        Err(e) => fail(e),
    }
}

/// Feed of active events, newest first, with optional city/category filters
#[instrument(skip(state))]
async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<FeedParams>,
) -> Reply<FeedResponse> {
    let all = state
        .gateway
        .cache()
        .scan_since(DateTime::UNIX_EPOCH, None);
    ok(feed_page(all, &params))
}

/// Node statistics
#[instrument(skip(state))]
async fn get_stats(State(state): State<AppState>) -> Reply<StatsResponse> {
    let cache_stats = state.gateway.cache().stats();
    let cluster = state.manager.status();
    ok(StatsResponse {
        node_id: cluster.node_id,
        role: cluster.role.to_string(),
        leader: cluster.leader,
        cache: CacheStatsBody {
            entries: cache_stats.entries,
            total_bytes: cache_stats.total_bytes,
            max_bytes: cache_stats.max_bytes,
            usage_percent: cache_stats.usage_percent,
        },
        peers: cluster.peers,
        sync_cursors: state
            .synchronizer
            .cursors()
            .into_iter()
            .map(|(peer_id, cursor)| SyncCursorBody { peer_id, cursor })
            .collect(),
    })
}

/// Anti-entropy pull: events updated after the peer's cursor
#[instrument(skip(state))]
async fn sync_pull(
    State(state): State<AppState>,
    Query(params): Query<SyncParams>,
) -> Reply<SyncPullResponse> {
    let page_limit = state.manager.config().sync_page_limit;
    let limit = params.limit.unwrap_or(page_limit).min(page_limit);
    let events = state.gateway.cache().scan_since(params.since, Some(limit));
    ok(SyncPullResponse {
        events,
        node_time: Utc::now(),
    })
}

/// Best-effort push from a peer
#[instrument(skip(state, event))]
async fn sync_push(State(state): State<AppState>, Json(event): Json<Event>) -> Reply<PushAck> {
    match state.gateway.merge_remote(event).await {
        Ok(outcome) => ok(PushAck {
            applied: outcome.applied(),
        }),
        Err(e) => fail(e),
    }
}

/// Peer heartbeat
#[instrument(skip(state, request))]
async fn heartbeat(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> Reply<HeartbeatResponse> {
    ok(state.manager.observe_heartbeat(&request))
}

/// Filter to active events, apply city/category filters, order newest first
/// and slice the requested page.
fn feed_page(events: Vec<Event>, params: &FeedParams) -> FeedResponse {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params
        .limit
        .unwrap_or(DEFAULT_FEED_LIMIT)
        .clamp(1, MAX_FEED_LIMIT);

    let mut matched: Vec<Event> = events
        .into_iter()
        .filter(|e| !e.is_deleted())
        .filter(|e| params.city.as_ref().map(|c| &e.city == c).unwrap_or(true))
        .filter(|e| {
            params
                .category
                .as_ref()
                .map(|c| &e.category == c)
                .unwrap_or(true)
        })
        .collect();
    matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

    let total = matched.len();
    let events: Vec<Event> = matched
        .into_iter()
        .skip(page.saturating_sub(1).saturating_mul(limit))
        .take(limit)
        .collect();
    FeedResponse {
        events,
        page,
        limit,
        total,
    }
}

/// Create REST API router
pub fn create_router(state: AppState) -> Router {
    let internal = Router::new()
        .route("/internal/sync", get(sync_pull))
        .route("/internal/push", post(sync_push))
        .route("/internal/heartbeat", post(heartbeat))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_peer_token,
        ));

    Router::new()
        // Event mutations and reads
        .route("/api/events", post(create_event))
        .route("/api/events", get(list_events))
        .route("/api/events/:id", get(get_event))
        .route("/api/events/:id", patch(update_event).delete(delete_event))
        .route("/api/events/:id/like", post(like_event))
        // Node introspection
        .route("/api/stats", get(get_stats))
        // Health check endpoints
        .route("/health", get(crate::health::health_check))
        .route("/ready", get(crate::health::health_readiness))
        .route("/live", get(crate::health::health_liveness))
        // Peer-facing endpoints, behind the shared token
        .merge(internal)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
