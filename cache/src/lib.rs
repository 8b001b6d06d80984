//! Byte-bounded store of replicated events with LRU/LFU hybrid eviction.
//!
//! The cache ranks eviction candidates by ascending `access_count`,
//! tie-broken by oldest `last_access_at`, and never evicts the entry being
//! inserted. A payload larger than the whole budget is rejected up front.

use chrono::{DateTime, Utc};
use evcache_common::{EvCacheError, Event, EventId, Result};
use metrics::{counter, gauge};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Default byte ceiling: 500 MiB of serialized payload.
pub const DEFAULT_MAX_BYTES: usize = 500 * 1024 * 1024;

/// Eviction metadata wrapped around a cached event. Owned exclusively by the
/// cache; callers only ever see `Event` clones.
struct CacheEntry {
    event: Event,
    last_access_at: DateTime<Utc>,
    size_bytes: usize,
    access_count: u64,
}

struct CacheInner {
    entries: HashMap<EventId, CacheEntry>,
    total_bytes: usize,
}

/// Capacity-bounded mapping from event id to cached event.
pub struct BoundedCache {
    inner: RwLock<CacheInner>,
    max_bytes: usize,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: usize,
    pub max_bytes: usize,
    pub usage_percent: f64,
}

impl BoundedCache {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                entries: HashMap::new(),
                total_bytes: 0,
            }),
            max_bytes,
        }
    }

    pub fn with_default_budget() -> Self {
        Self::new(DEFAULT_MAX_BYTES)
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Insert or replace the entry for `event.id`, evicting least-frequently
    /// then least-recently used entries until the new entry fits. Fails fast
    /// with `CapacityExceeded` if the event alone exceeds the budget.
    pub fn put(&self, event: Event) -> Result<()> {
        let size_bytes = serde_json::to_vec(&event)?.len();
        if size_bytes > self.max_bytes {
            return Err(EvCacheError::CapacityExceeded {
                id: event.id.clone(),
                size_bytes,
                max_bytes: self.max_bytes,
            });
        }

        let mut inner = self.inner.write();

        let (replaced_bytes, prior_access_count) = match inner.entries.get(&event.id) {
            Some(existing) => (existing.size_bytes, existing.access_count),
            None => (0, 0),
        };

        // Free space for the incoming entry, never considering it a victim.
        while inner.total_bytes - replaced_bytes + size_bytes > self.max_bytes {
            let victim = inner
                .entries
                .values()
                .filter(|e| e.event.id != event.id)
                .min_by(|a, b| {
                    a.access_count
                        .cmp(&b.access_count)
                        .then_with(|| a.last_access_at.cmp(&b.last_access_at))
                })
                .map(|e| e.event.id.clone());

            match victim {
                Some(id) => {
                    if let Some(entry) = inner.entries.remove(&id) {
                        inner.total_bytes -= entry.size_bytes;
                        counter!("evcache.cache.evictions").increment(1);
                        debug!(
                            "Evicted {} ({} bytes, {} accesses)",
                            id, entry.size_bytes, entry.access_count
                        );
                    }
                }
                None => break, // only the incoming entry remains accountable
            }
        }

        inner.total_bytes = inner.total_bytes - replaced_bytes + size_bytes;
        inner.entries.insert(
            event.id.clone(),
            CacheEntry {
                event,
                last_access_at: Utc::now(),
                size_bytes,
                access_count: prior_access_count,
            },
        );

        gauge!("evcache.cache.bytes").set(inner.total_bytes as f64);
        Ok(())
    }

    /// Look up an event, bumping its access metadata. A miss is not an
    /// error; callers fall back to their authoritative store if they have
    /// one. Tombstoned entries are returned as-is.
    pub fn get(&self, id: &str) -> Option<Event> {
        let mut inner = self.inner.write();
        let entry = inner.entries.get_mut(id)?;
        entry.access_count += 1;
        entry.last_access_at = Utc::now();
        Some(entry.event.clone())
    }

    /// Look up an event without touching access metadata. Used by the merge
    /// path, which must not distort eviction ranking.
    pub fn peek(&self, id: &str) -> Option<Event> {
        self.inner.read().entries.get(id).map(|e| e.event.clone())
    }

    /// Remove an entry outright. Eviction bookkeeping only; the logical
    /// delete mutation writes a tombstone through `put` instead.
    pub fn delete(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.entries.remove(id) {
            Some(entry) => {
                inner.total_bytes -= entry.size_bytes;
                gauge!("evcache.cache.bytes").set(inner.total_bytes as f64);
                true
            }
            None => false,
        }
    }

    /// Events with `updated_at` strictly greater than `since`, ascending by
    /// `updated_at`, capped at `limit` when given. Feeds the sync-pull
    /// endpoint and feed queries.
    pub fn scan_since(&self, since: DateTime<Utc>, limit: Option<usize>) -> Vec<Event> {
        let inner = self.inner.read();
        let mut events: Vec<Event> = inner
            .entries
            .values()
            .filter(|e| e.event.updated_at > since)
            .map(|e| e.event.clone())
            .collect();
        events.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = limit {
            events.truncate(limit);
        }
        events
    }

    /// Running total of entry sizes. Always equals the recomputed sum; the
    /// invariant is exercised by property tests.
    pub fn total_bytes(&self) -> usize {
        self.inner.read().total_bytes
    }

    /// Recompute the byte total from scratch. Test support for validating
    /// the running total.
    pub fn recomputed_bytes(&self) -> usize {
        self.inner
            .read()
            .entries
            .values()
            .map(|e| e.size_bytes)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read();
        let usage_percent = if self.max_bytes == 0 {
            0.0
        } else {
            (inner.total_bytes as f64 / self.max_bytes as f64) * 100.0
        };
        if usage_percent >= 90.0 {
            warn!(
                "Cache at {:.1}% of its {} byte budget",
                usage_percent, self.max_bytes
            );
        }
        CacheStats {
            entries: inner.entries.len(),
            total_bytes: inner.total_bytes,
            max_bytes: self.max_bytes,
            usage_percent,
        }
    }
}
