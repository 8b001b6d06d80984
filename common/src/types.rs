use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// Unique identifier for replicated events
pub type EventId = String;

/// Stable identifier for a node in the peer set
pub type ServerId = String;

/// Replication status of an event. Deletion is a tombstone so that deletes
/// propagate through sync instead of silently disappearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Active,
    Deleted,
}

/// Author of an event; opaque to the replication core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub name: String,
}

/// The replicated entity. `version` increases by exactly 1 on every accepted
/// local mutation; replicas converge with last-writer-wins (see
/// [`Event::dominates`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    pub description: String,
    pub author: Author,
    pub city: String,
    pub category: String,
    pub likes: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: EventStatus,
    pub origin_server_id: ServerId,
    pub version: u64,
}

impl Event {
    pub fn is_deleted(&self) -> bool {
        self.status == EventStatus::Deleted
    }

    /// Total dominance ordering used by the merge rule: higher `version`
    /// wins; equal versions are broken by later `updated_at`; equal on both
    /// (concurrent independent edits) are broken by higher `origin_server_id`,
    /// an arbitrary but total order so every node picks the same winner.
    pub fn dominance(&self, other: &Event) -> Ordering {
        self.version
            .cmp(&other.version)
            .then_with(|| self.updated_at.cmp(&other.updated_at))
            .then_with(|| self.origin_server_id.cmp(&other.origin_server_id))
    }

    /// True if this replica strictly dominates `other` and should replace it.
    pub fn dominates(&self, other: &Event) -> bool {
        self.dominance(other) == Ordering::Greater
    }
}

/// Generate a globally unique event id without coordination: originating
/// node id + wall-clock millis + random suffix.
pub fn new_event_id(server_id: &str) -> EventId {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}",
        server_id,
        Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}

/// Fields supplied by a caller when creating an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub title: String,
    pub description: String,
    pub author: Author,
    pub city: String,
    pub category: String,
}

/// Partial update to an event's payload fields. Absent fields are left
/// unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub city: Option<String>,
    pub category: Option<String>,
}

impl EventPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.city.is_none()
            && self.category.is_none()
    }
}

/// Kind of change carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Emitted to the external notification sink for every locally applied or
/// remotely merged change. The external layer decides what to do with it;
/// the core never waits for acknowledgment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub kind: ChangeKind,
    pub event: Event,
}

/// Sync-pull response: events with `updated_at` past the requested cursor,
/// ascending, plus the responding node's clock for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPullResponse {
    pub events: Vec<Event>,
    pub node_time: DateTime<Utc>,
}

/// Peer heartbeat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub from_node_id: ServerId,
    pub is_leader: bool,
    pub timestamp: DateTime<Utc>,
}

/// Peer heartbeat response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub node_id: ServerId,
    pub is_leader: bool,
    pub timestamp: DateTime<Utc>,
}

/// Acknowledgment for a best-effort push notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushAck {
    pub applied: bool,
}
