use crate::client::PeerClient;
use crate::manager::ClusterManager;
use crate::types::PeerConfig;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use evcache_common::{Event, Result, ServerId};
use evcache_gateway::EventGateway;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, warn};

/// Anti-entropy synchronizer: periodically pulls recent events from every
/// peer and merges them through the gateway.
///
/// One cursor per peer tracks the greatest `updated_at` seen from that peer.
/// The cursor only advances after a successful pull; a failed round leaves it
/// where it was, so the next round re-covers the same window. Merged events
/// that lose the dominance comparison still advance the cursor, since they
/// were seen.
pub struct Synchronizer {
    gateway: Arc<EventGateway>,
    manager: Arc<ClusterManager>,
    client: Arc<PeerClient>,
    cursors: DashMap<ServerId, DateTime<Utc>>,
}

impl Synchronizer {
    pub fn new(
        gateway: Arc<EventGateway>,
        manager: Arc<ClusterManager>,
        client: Arc<PeerClient>,
    ) -> Self {
        Self {
            gateway,
            manager,
            client,
            cursors: DashMap::new(),
        }
    }

    /// Cursor for a peer; epoch until the first successful pull.
    pub fn cursor(&self, peer_id: &str) -> DateTime<Utc> {
        self.cursors
            .get(peer_id)
            .map(|entry| *entry.value())
            .unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// Per-peer cursors for the stats endpoint, sorted by peer id.
    pub fn cursors(&self) -> Vec<(ServerId, DateTime<Utc>)> {
        let mut cursors: Vec<_> = self
            .cursors
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        cursors.sort_by(|a, b| a.0.cmp(&b.0));
        cursors
    }

    /// Run sync rounds forever. Each peer is pulled in its own task so a
    /// slow or dead peer never blocks the rest of the round.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.manager.config().sync_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            counter!("evcache.sync.rounds").increment(1);

            let mut handles = Vec::new();
            for peer in self.manager.peer_configs() {
                let sync = self.clone();
                handles.push(tokio::spawn(async move {
                    match sync.sync_peer(&peer).await {
                        Ok(applied) => {
                            debug!("Synced with {}: {} events applied", peer.id, applied);
                        }
                        Err(err) => {
                            warn!("Sync with {} failed: {}", peer.id, err);
                            sync.manager.mark_peer_unreachable(&peer.id);
                        }
                    }
                }));
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    /// One pull-and-merge exchange with one peer.
    pub async fn sync_peer(&self, peer: &PeerConfig) -> Result<usize> {
        let since = self.cursor(&peer.id);
        let limit = self.manager.config().sync_page_limit;
        let response = self.client.pull_since(peer, since, limit).await?;
        self.manager.mark_peer_reachable(&peer.id);
        self.apply_page(&peer.id, response.events).await
    }

    /// Merge a pulled page and advance the peer's cursor to the greatest
    /// `updated_at` in it. An event the cache cannot hold is logged and
    /// skipped; it still counts as seen.
    async fn apply_page(&self, peer_id: &str, events: Vec<Event>) -> Result<usize> {
        let mut max_seen = self.cursor(peer_id);
        let mut applied = 0;

        for event in events {
            if event.updated_at > max_seen {
                max_seen = event.updated_at;
            }
            match self.gateway.merge_remote(event).await {
                Ok(outcome) if outcome.applied() => applied += 1,
                Ok(_) => {}
                Err(err) => warn!("Dropping unmergeable event from {}: {}", peer_id, err),
            }
        }

        self.cursors.insert(peer_id.to_string(), max_seen);
        counter!("evcache.sync.applied").increment(applied as u64);
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClusterConfig;
    use chrono::TimeZone;
    use evcache_cache::BoundedCache;
    use evcache_common::{Author, EventStatus};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn synchronizer() -> Synchronizer {
        let flag = Arc::new(AtomicBool::new(false));
        let gateway = Arc::new(EventGateway::new(
            "n1".to_string(),
            Arc::new(BoundedCache::new(1024 * 1024)),
            flag.clone(),
        ));
        let manager = Arc::new(ClusterManager::new(
            ClusterConfig {
                node_id: "n1".to_string(),
                ..Default::default()
            },
            flag,
        ));
        let client =
            Arc::new(PeerClient::new("token".to_string(), Duration::from_secs(1)).unwrap());
        Synchronizer::new(gateway, manager, client)
    }

    fn event(id: &str, version: u64, updated_millis: i64) -> Event {
        Event {
            id: id.to_string(),
            title: "t".to_string(),
            description: "d".to_string(),
            author: Author {
                id: "a".to_string(),
                name: "a".to_string(),
            },
            city: "c".to_string(),
            category: "cat".to_string(),
            likes: 0,
            created_at: Utc.timestamp_millis_opt(updated_millis).unwrap(),
            updated_at: Utc.timestamp_millis_opt(updated_millis).unwrap(),
            status: EventStatus::Active,
            origin_server_id: "n2".to_string(),
            version,
        }
    }

    #[test]
    fn cursor_starts_at_epoch() {
        let sync = synchronizer();
        assert_eq!(sync.cursor("n2"), DateTime::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn applied_page_advances_cursor_to_max_seen() {
        let sync = synchronizer();
        let applied = sync
            .apply_page("n2", vec![event("e1", 1, 500), event("e2", 1, 300)])
            .await
            .unwrap();

        assert_eq!(applied, 2);
        assert_eq!(sync.cursor("n2"), Utc.timestamp_millis_opt(500).unwrap());
    }

    #[tokio::test]
    async fn discarded_events_still_advance_cursor() {
        let sync = synchronizer();
        sync.apply_page("n2", vec![event("e1", 3, 500)]).await.unwrap();

        // A stale copy of the same event arrives later in the stream.
        let applied = sync.apply_page("n2", vec![event("e1", 1, 900)]).await.unwrap();
        assert_eq!(applied, 0);
        assert_eq!(sync.cursor("n2"), Utc.timestamp_millis_opt(900).unwrap());
    }

    #[tokio::test]
    async fn empty_page_keeps_cursor() {
        let sync = synchronizer();
        sync.apply_page("n2", vec![event("e1", 1, 500)]).await.unwrap();
        sync.apply_page("n2", Vec::new()).await.unwrap();
        assert_eq!(sync.cursor("n2"), Utc.timestamp_millis_opt(500).unwrap());
    }

    #[tokio::test]
    async fn cursors_are_independent_per_peer() {
        let sync = synchronizer();
        sync.apply_page("n2", vec![event("e1", 1, 500)]).await.unwrap();
        sync.apply_page("n3", vec![event("e2", 1, 200)]).await.unwrap();

        assert_eq!(sync.cursor("n2"), Utc.timestamp_millis_opt(500).unwrap());
        assert_eq!(sync.cursor("n3"), Utc.timestamp_millis_opt(200).unwrap());
        assert_eq!(sync.cursors().len(), 2);
    }
}
