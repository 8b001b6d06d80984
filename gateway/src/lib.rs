//! Mutation gateway: the single entry point for every change to the local
//! replica, whether it originates from a client request or from anti-entropy
//! merge. All version read-check-write sequences run under one async mutex;
//! fan-out (change notifications, peer push feed, external publication)
//! happens outside the critical section on the committed value.

use chrono::Utc;
use evcache_cache::BoundedCache;
use evcache_common::{
    ChangeKind, ChangeNotification, EvCacheError, Event, EventPatch, EventPayload, EventStatus,
    Result, ServerId,
};
use metrics::counter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

/// Outcome of merging a replica received from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No local replica existed; the incoming copy was inserted.
    Inserted,
    /// The incoming copy dominated the local replica and replaced it.
    Replaced,
    /// The local replica already dominates; the incoming copy was dropped.
    Discarded,
}

impl MergeOutcome {
    pub fn applied(&self) -> bool {
        !matches!(self, MergeOutcome::Discarded)
    }
}

pub struct EventGateway {
    server_id: ServerId,
    cache: Arc<BoundedCache>,
    /// Guards every version read-check-write, local or merged.
    mutation_lock: Mutex<()>,
    /// Change notification sink: every local or merged change.
    changes_tx: broadcast::Sender<ChangeNotification>,
    /// Best-effort push feed consumed by the cluster layer.
    outbound_tx: broadcast::Sender<Event>,
    /// External publication stream; only fed while this node leads.
    publish_tx: broadcast::Sender<Event>,
    is_leader: Arc<AtomicBool>,
    accepting: AtomicBool,
}

impl EventGateway {
    pub fn new(server_id: ServerId, cache: Arc<BoundedCache>, is_leader: Arc<AtomicBool>) -> Self {
        let (changes_tx, _) = broadcast::channel(1024);
        let (outbound_tx, _) = broadcast::channel(1024);
        let (publish_tx, _) = broadcast::channel(256);
        Self {
            server_id,
            cache,
            mutation_lock: Mutex::new(()),
            changes_tx,
            outbound_tx,
            publish_tx,
            is_leader,
            accepting: AtomicBool::new(true),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn cache(&self) -> &Arc<BoundedCache> {
        &self.cache
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Change notifications for the embedding layer (WebSocket fan-out and
    /// the like). Receivers that lag simply miss messages.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeNotification> {
        self.changes_tx.subscribe()
    }

    /// Locally applied mutations, for the cluster layer's best-effort push.
    pub fn subscribe_outbound(&self) -> broadcast::Receiver<Event> {
        self.outbound_tx.subscribe()
    }

    /// Leader-only external publication stream (created events).
    pub fn subscribe_publications(&self) -> broadcast::Receiver<Event> {
        self.publish_tx.subscribe()
    }

    /// Stop accepting new mutations. In-flight peer calls drain on their
    /// own timeouts; merges from sync keep applying.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        info!("Gateway no longer accepting mutations");
    }

    fn check_accepting(&self) -> Result<()> {
        if self.accepting.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EvCacheError::Config("node is shutting down".to_string()))
        }
    }

    /// Create a new event originating at this node.
    pub async fn create_event(&self, payload: EventPayload) -> Result<Event> {
        self.check_accepting()?;
        let now = Utc::now();
        let event = Event {
            id: evcache_common::new_event_id(&self.server_id),
            title: payload.title,
            description: payload.description,
            author: payload.author,
            city: payload.city,
            category: payload.category,
            likes: 0,
            created_at: now,
            updated_at: now,
            status: EventStatus::Active,
            origin_server_id: self.server_id.clone(),
            version: 1,
        };

        {
            let _guard = self.mutation_lock.lock().await;
            self.cache.put(event.clone())?;
        }
        counter!("evcache.gateway.created").increment(1);
        info!("Created event {} (v1)", event.id);

        self.fan_out(ChangeKind::Created, &event);
        if self.is_leader() {
            // Only the leader forwards to the external publication channel;
            // the receiving side must still be idempotent.
            let _ = self.publish_tx.send(event.clone());
        }
        Ok(event)
    }

    /// Apply a partial update to a locally resolvable event.
    pub async fn update_event(&self, id: &str, patch: EventPatch) -> Result<Event> {
        self.check_accepting()?;
        let event = {
            let _guard = self.mutation_lock.lock().await;
            let mut event = self.resolve_active(id)?;
            if let Some(title) = patch.title {
                event.title = title;
            }
            if let Some(description) = patch.description {
                event.description = description;
            }
            if let Some(city) = patch.city {
                event.city = city;
            }
            if let Some(category) = patch.category {
                event.category = category;
            }
            self.bump(&mut event);
            self.cache.put(event.clone())?;
            event
        };
        counter!("evcache.gateway.updated").increment(1);
        debug!("Updated event {} (v{})", event.id, event.version);

        self.fan_out(ChangeKind::Updated, &event);
        Ok(event)
    }

    /// Tombstone an event. The record stays in the cache (until evicted) so
    /// the deletion replicates; it never takes the physical-removal path.
    pub async fn delete_event(&self, id: &str) -> Result<()> {
        self.check_accepting()?;
        let event = {
            let _guard = self.mutation_lock.lock().await;
            let mut event = self.resolve_active(id)?;
            event.status = EventStatus::Deleted;
            self.bump(&mut event);
            self.cache.put(event.clone())?;
            event
        };
        counter!("evcache.gateway.deleted").increment(1);
        info!("Deleted event {} (v{})", event.id, event.version);

        self.fan_out(ChangeKind::Deleted, &event);
        Ok(())
    }

    /// Adjust the like counter by +1 (`is_liked`) or -1, clamped at zero.
    pub async fn like_event(&self, id: &str, is_liked: bool) -> Result<Event> {
        self.check_accepting()?;
        let event = {
            let _guard = self.mutation_lock.lock().await;
            let mut event = self.resolve_active(id)?;
            event.likes = if is_liked {
                event.likes.saturating_add(1)
            } else {
                event.likes.saturating_sub(1)
            };
            self.bump(&mut event);
            self.cache.put(event.clone())?;
            event
        };
        counter!("evcache.gateway.liked").increment(1);

        self.fan_out(ChangeKind::Updated, &event);
        Ok(event)
    }

    /// Merge a replica received from a peer (pull sync or push notify),
    /// applying the last-writer-wins rule. An applied merge emits the same
    /// change notification a local write would, but never feeds the external
    /// publication stream.
    pub async fn merge_remote(&self, incoming: Event) -> Result<MergeOutcome> {
        let (outcome, kind) = {
            let _guard = self.mutation_lock.lock().await;
            match self.cache.peek(&incoming.id) {
                None => {
                    let kind = if incoming.is_deleted() {
                        ChangeKind::Deleted
                    } else {
                        ChangeKind::Created
                    };
                    self.cache.put(incoming.clone())?;
                    (MergeOutcome::Inserted, Some(kind))
                }
                Some(local) => {
                    if incoming.dominates(&local) {
                        let kind = if incoming.is_deleted() {
                            ChangeKind::Deleted
                        } else {
                            ChangeKind::Updated
                        };
                        self.cache.put(incoming.clone())?;
                        (MergeOutcome::Replaced, Some(kind))
                    } else {
                        (MergeOutcome::Discarded, None)
                    }
                }
            }
        };

        if let Some(kind) = kind {
            counter!("evcache.gateway.merged").increment(1);
            debug!(
                "Merged event {} (v{}) from {}",
                incoming.id, incoming.version, incoming.origin_server_id
            );
            let _ = self.changes_tx.send(ChangeNotification {
                kind,
                event: incoming,
            });
        }
        Ok(outcome)
    }

    /// Resolve a mutation target: present locally and not tombstoned.
    fn resolve_active(&self, id: &str) -> Result<Event> {
        match self.cache.get(id) {
            Some(event) if !event.is_deleted() => Ok(event),
            _ => Err(EvCacheError::EventNotFound { id: id.to_string() }),
        }
    }

    /// Stamp an accepted local mutation: version +1, this node as origin,
    /// fresh `updated_at`.
    fn bump(&self, event: &mut Event) {
        event.version += 1;
        event.origin_server_id = self.server_id.clone();
        event.updated_at = Utc::now();
    }

    fn fan_out(&self, kind: ChangeKind, event: &Event) {
        let _ = self.changes_tx.send(ChangeNotification {
            kind,
            event: event.clone(),
        });
        let _ = self.outbound_tx.send(event.clone());
    }
}
