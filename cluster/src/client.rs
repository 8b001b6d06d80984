use crate::types::PeerConfig;
use chrono::{DateTime, Utc};
use evcache_common::{
    EvCacheError, Event, HeartbeatRequest, HeartbeatResponse, PushAck, Result, SyncPullResponse,
};
use std::time::Duration;

/// HTTP client for the peer-facing endpoints. Every call is bounded by the
/// configured timeout; failures surface as `PeerUnreachable` and are for the
/// caller to log, never to propagate to a mutation caller.
pub struct PeerClient {
    http: reqwest::Client,
    token: String,
}

impl PeerClient {
    pub fn new(token: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EvCacheError::Config(format!("failed to build http client: {}", e)))?;
        Ok(Self { http, token })
    }

    /// Ping a peer, announcing our id and leadership claim.
    pub async fn heartbeat(
        &self,
        peer: &PeerConfig,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse> {
        let url = format!("{}/internal/heartbeat", peer.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await
            .map_err(|e| unreachable(peer, e))?;
        decode(peer, response).await
    }

    /// Pull events a peer has seen after `since`, capped at `limit`.
    pub async fn pull_since(
        &self,
        peer: &PeerConfig,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<SyncPullResponse> {
        let url = format!("{}/internal/sync", peer.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("since", since.to_rfc3339()), ("limit", limit.to_string())])
            .send()
            .await
            .map_err(|e| unreachable(peer, e))?;
        decode(peer, response).await
    }

    /// Best-effort push of a locally applied mutation.
    pub async fn push_event(&self, peer: &PeerConfig, event: &Event) -> Result<PushAck> {
        let url = format!("{}/internal/push", peer.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(event)
            .send()
            .await
            .map_err(|e| unreachable(peer, e))?;
        decode(peer, response).await
    }
}

fn unreachable(peer: &PeerConfig, err: reqwest::Error) -> EvCacheError {
    EvCacheError::PeerUnreachable {
        peer: peer.id.clone(),
        reason: err.to_string(),
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    peer: &PeerConfig,
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(EvCacheError::PeerUnreachable {
            peer: peer.id.clone(),
            reason: format!("HTTP {}", status),
        });
    }
    response.json().await.map_err(|e| unreachable(peer, e))
}
