//! Replica convergence tests exercising the merge rule across gateways the
//! way anti-entropy rounds do, without the network in between.

use chrono::{TimeZone, Utc};
use evcache_cache::BoundedCache;
use evcache_common::{Author, Event, EventPatch, EventPayload, EventStatus};
use evcache_gateway::{EventGateway, MergeOutcome};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn gateway(server_id: &str) -> EventGateway {
    EventGateway::new(
        server_id.to_string(),
        Arc::new(BoundedCache::new(4 * 1024 * 1024)),
        Arc::new(AtomicBool::new(false)),
    )
}

fn payload(title: &str) -> EventPayload {
    EventPayload {
        title: title.to_string(),
        description: "desc".to_string(),
        author: Author {
            id: "u1".to_string(),
            name: "alice".to_string(),
        },
        city: "berlin".to_string(),
        category: "music".to_string(),
    }
}

/// Copy everything node `from` knows into node `to`, like one sync round
/// with an epoch cursor.
async fn sync_all(from: &EventGateway, to: &EventGateway) {
    let since = Utc.timestamp_millis_opt(0).unwrap();
    for event in from.cache().scan_since(since, None) {
        to.merge_remote(event).await.unwrap();
    }
}

fn replica_tuples(gw: &EventGateway) -> Vec<(String, u64, i64, EventStatus)> {
    let since = Utc.timestamp_millis_opt(0).unwrap();
    let mut tuples: Vec<_> = gw
        .cache()
        .scan_since(since, None)
        .into_iter()
        .map(|e| (e.id, e.version, e.updated_at.timestamp_millis(), e.status))
        .collect();
    tuples.sort();
    tuples
}

#[tokio::test]
async fn two_nodes_converge_after_sync_rounds() {
    let a = gateway("n1");
    let b = gateway("n2");

    let e1 = a.create_event(payload("from a")).await.unwrap();
    let e2 = b.create_event(payload("from b")).await.unwrap();

    sync_all(&a, &b).await;
    sync_all(&b, &a).await;

    // B likes A's event; another round converges both again.
    b.like_event(&e1.id, true).await.unwrap();
    a.update_event(&e2.id, EventPatch {
        city: Some("hamburg".to_string()),
        ..Default::default()
    })
    .await
    .unwrap();

    sync_all(&a, &b).await;
    sync_all(&b, &a).await;

    assert_eq!(replica_tuples(&a), replica_tuples(&b));
    assert_eq!(a.cache().peek(&e1.id).unwrap().likes, 1);
    assert_eq!(b.cache().peek(&e2.id).unwrap().city, "hamburg");
}

#[tokio::test]
async fn tombstone_survives_concurrent_update_race() {
    let a = gateway("n1");
    let b = gateway("n2");

    let event = a.create_event(payload("short lived")).await.unwrap();
    sync_all(&a, &b).await;

    // Concurrently: A deletes (v2), B likes (v2). Deterministic winner on
    // both sides regardless of merge order.
    a.delete_event(&event.id).await.unwrap();
    b.like_event(&event.id, true).await.unwrap();

    sync_all(&a, &b).await;
    sync_all(&b, &a).await;
    sync_all(&a, &b).await;

    let on_a = a.cache().peek(&event.id).unwrap();
    let on_b = b.cache().peek(&event.id).unwrap();
    assert_eq!(on_a.status, on_b.status);
    assert_eq!(on_a.version, on_b.version);
    assert_eq!(on_a.origin_server_id, on_b.origin_server_id);
}

#[tokio::test]
async fn equal_version_equal_timestamp_picks_same_winner_everywhere() {
    let a = gateway("n1");
    let b = gateway("n2");

    let ts = Utc.timestamp_millis_opt(1_000_000).unwrap();
    let base = Event {
        id: "contested".to_string(),
        title: "v2 from n1".to_string(),
        description: "d".to_string(),
        author: Author {
            id: "u1".to_string(),
            name: "alice".to_string(),
        },
        city: "berlin".to_string(),
        category: "music".to_string(),
        likes: 0,
        created_at: ts,
        updated_at: ts,
        status: EventStatus::Active,
        origin_server_id: "n1".to_string(),
        version: 2,
    };
    let mut rival = base.clone();
    rival.title = "v2 from n2".to_string();
    rival.origin_server_id = "n2".to_string();

    // Opposite merge orders on the two nodes.
    a.merge_remote(base.clone()).await.unwrap();
    a.merge_remote(rival.clone()).await.unwrap();
    b.merge_remote(rival).await.unwrap();
    b.merge_remote(base).await.unwrap();

    let on_a = a.cache().peek("contested").unwrap();
    let on_b = b.cache().peek("contested").unwrap();
    assert_eq!(on_a.title, on_b.title);
    // Higher origin_server_id wins the full tie.
    assert_eq!(on_a.origin_server_id, "n2");
}

#[tokio::test]
async fn version_is_monotonic_under_merges() {
    let a = gateway("n1");
    let b = gateway("n2");

    let event = a.create_event(payload("tracked")).await.unwrap();
    sync_all(&a, &b).await;

    let mut observed = vec![b.cache().peek(&event.id).unwrap().version];

    for _ in 0..3 {
        a.like_event(&event.id, true).await.unwrap();
        sync_all(&a, &b).await;
        observed.push(b.cache().peek(&event.id).unwrap().version);

        // Replaying old state never decreases the observed version.
        let stale = b.cache().peek(&event.id).unwrap();
        b.merge_remote(stale).await.unwrap();
        observed.push(b.cache().peek(&event.id).unwrap().version);
    }

    for pair in observed.windows(2) {
        assert!(pair[1] >= pair[0], "version went backwards: {:?}", observed);
    }
    assert_eq!(*observed.last().unwrap(), 4);
}

#[tokio::test]
async fn three_nodes_converge_on_delete_through_relay() {
    let a = gateway("n1");
    let b = gateway("n2");
    let c = gateway("n3");

    // Created on A, liked on B, deleted on C, with sync rounds in between.
    let event = a.create_event(payload("traveling")).await.unwrap();
    sync_all(&a, &b).await;
    sync_all(&a, &c).await;

    b.like_event(&event.id, true).await.unwrap();
    sync_all(&b, &c).await;
    c.delete_event(&event.id).await.unwrap();

    // A never talks to C directly; B relays the tombstone.
    sync_all(&c, &b).await;
    sync_all(&b, &a).await;

    for gw in [&a, &b, &c] {
        let replica = gw.cache().peek(&event.id).unwrap();
        assert_eq!(replica.status, EventStatus::Deleted);
        assert_eq!(replica.version, 3);
        assert_eq!(replica.origin_server_id, "n3");
        assert_eq!(replica.likes, 1);
    }
}

#[tokio::test]
async fn replaying_synced_state_merges_zero_events() {
    let a = gateway("n1");
    let b = gateway("n2");

    a.create_event(payload("one")).await.unwrap();
    a.create_event(payload("two")).await.unwrap();
    sync_all(&a, &b).await;

    let since = Utc.timestamp_millis_opt(0).unwrap();
    let before = replica_tuples(&b);
    for event in a.cache().scan_since(since, None) {
        let outcome = b.merge_remote(event).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Discarded);
    }
    assert_eq!(replica_tuples(&b), before);
}
