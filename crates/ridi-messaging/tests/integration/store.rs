/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */


//! Store-level tests: claiming, acknowledgment and maintenance.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ridi_messaging::database::UniversalTimestamp;
use ridi_messaging::error::QueueNameError;
use ridi_messaging::QueueError;
use serial_test::serial;
use tokio::sync::Barrier;

use crate::fixtures::fixture;

const VT: Duration = Duration::from_secs(30);

/// Concurrent claimers never receive the same message.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_concurrent_claims_never_overlap() {
    let fixture = fixture().await;
    let store = fixture.store();

    const NUM_MESSAGES: usize = 20;
    for i in 0..NUM_MESSAGES {
        store
            .send("plan_new", format!(r#"{{"planId":"p{i}"}}"#), Duration::ZERO)
            .await
            .expect("Failed to send");
    }

    const NUM_WORKERS: usize = 8;
    let barrier = Arc::new(Barrier::new(NUM_WORKERS));
    let mut handles = Vec::new();

    for _ in 0..NUM_WORKERS {
        let store = store.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let mut claimed = Vec::new();
            loop {
                let batch = store.claim("plan_new", VT, 3).await.expect("claim failed");
                if batch.is_empty() {
                    break;
                }
                claimed.extend(batch.into_iter().map(|m| m.id));
            }
            claimed
        }));
    }

    let mut all_claimed = Vec::new();
    for handle in handles {
        all_claimed.extend(handle.await.expect("worker panicked"));
    }

    let unique: HashSet<i64> = all_claimed.iter().copied().collect();
    assert_eq!(
        unique.len(),
        all_claimed.len(),
        "a message was claimed more than once: {all_claimed:?}"
    );
    assert_eq!(unique.len(), NUM_MESSAGES);
}

/// Claimers on separate connection pools never receive the same message.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_concurrent_claims_across_pools_never_overlap() {
    let fixture = fixture().await;
    let producer_store = fixture.store();

    const NUM_MESSAGES: usize = 200;
    let payloads = (0..NUM_MESSAGES)
        .map(|i| format!(r#"{{"planId":"p{i}"}}"#))
        .collect();
    producer_store
        .send_batch("plan_new", payloads, Duration::ZERO)
        .await
        .expect("Failed to send batch");

    const NUM_POOLS: usize = 4;
    let barrier = Arc::new(Barrier::new(NUM_POOLS));
    let mut handles = Vec::new();

    for _ in 0..NUM_POOLS {
        let store = fixture.independent_store().await;
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let mut claimed = Vec::new();
            loop {
                let batch = store.claim("plan_new", VT, 5).await.expect("claim failed");
                if batch.is_empty() {
                    break;
                }
                claimed.extend(batch.into_iter().map(|m| m.id));
            }
            claimed
        }));
    }

    let mut per_pool = Vec::new();
    for handle in handles {
        per_pool.push(handle.await.expect("worker panicked"));
    }

    let all_claimed: Vec<i64> = per_pool.iter().flatten().copied().collect();
    let unique: HashSet<i64> = all_claimed.iter().copied().collect();
    assert_eq!(
        unique.len(),
        all_claimed.len(),
        "a message was claimed more than once across pools"
    );
    assert_eq!(unique.len(), NUM_MESSAGES);

    let metrics = producer_store.metrics("plan_new").await.unwrap();
    assert_eq!(metrics.claimable, 0);
    assert_eq!(metrics.in_flight, NUM_MESSAGES as i64);
    assert_eq!(metrics.max_read_count, Some(1));
}

#[tokio::test]
#[serial]
async fn test_claim_orders_by_id_and_respects_limit() {
    let fixture = fixture().await;
    let store = fixture.store();

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(
            store
                .send("route_map_gen", format!(r#"{{"routeId":"r{i}"}}"#), Duration::ZERO)
                .await
                .unwrap(),
        );
    }

    let first = store.claim("route_map_gen", VT, 3).await.unwrap();
    let first_ids: Vec<i64> = first.iter().map(|m| m.id).collect();
    assert_eq!(first_ids, ids[..3]);
    assert!(first.iter().all(|m| m.read_count == 1));

    let rest = store.claim("route_map_gen", VT, 10).await.unwrap();
    assert_eq!(rest.len(), 2);

    assert!(store.claim("route_map_gen", VT, 0).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn test_claim_is_scoped_to_queue() {
    let fixture = fixture().await;
    let store = fixture.store();

    store
        .send("user_new", r#"{"userId":"u1"}"#.into(), Duration::ZERO)
        .await
        .unwrap();

    assert!(store.claim("plan_new", VT, 10).await.unwrap().is_empty());
    assert_eq!(store.claim("user_new", VT, 10).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn test_delete_is_idempotent() {
    let fixture = fixture().await;
    let store = fixture.store();

    let id = store
        .send("plan_new", r#"{"planId":"p1"}"#.into(), Duration::ZERO)
        .await
        .unwrap();

    assert!(store.delete("plan_new", id).await.unwrap());
    assert!(!store.delete("plan_new", id).await.unwrap());
    assert!(!store.delete("plan_new", id + 1_000).await.unwrap());
    assert!(store.find("plan_new", id).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn test_ack_requires_matching_queue() {
    let fixture = fixture().await;
    let store = fixture.store();

    let id = store
        .send("plan_new", r#"{"planId":"p1"}"#.into(), Duration::ZERO)
        .await
        .unwrap();

    assert!(!store.delete("plan_map_gen", id).await.unwrap());
    assert!(!store.archive("plan_map_gen", id).await.unwrap());
    assert!(store.find("plan_new", id).await.unwrap().is_some());
}

#[tokio::test]
#[serial]
async fn test_visibility_timeout_redelivers_after_expiry() {
    let fixture = fixture().await;
    let store = fixture.store();
    let vt = Duration::from_millis(300);

    let id = store
        .send("plan_new", r#"{"planId":"p1"}"#.into(), Duration::ZERO)
        .await
        .unwrap();

    let first = store.claim("plan_new", vt, 1).await.unwrap();
    assert_eq!(first.len(), 1);
    let hidden_until = first[0].visible_at;

    // Still hidden
    assert!(store.claim("plan_new", vt, 1).await.unwrap().is_empty());

    tokio::time::sleep(vt + Duration::from_millis(100)).await;

    let second = store.claim("plan_new", vt, 1).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, id);
    assert_eq!(second[0].read_count, 2);
    assert!(UniversalTimestamp::now() >= hidden_until);
}

#[tokio::test]
#[serial]
async fn test_read_count_increments_once_per_claim() {
    let fixture = fixture().await;
    let store = fixture.store();

    store
        .send("plan_new", r#"{"planId":"p1"}"#.into(), Duration::ZERO)
        .await
        .unwrap();

    // A zero timeout makes the message claimable again straight away
    for expected in 1..=3 {
        let claimed = store.claim("plan_new", Duration::ZERO, 1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].read_count, expected);
    }
}

#[tokio::test]
#[serial]
async fn test_archived_messages_are_never_claimed() {
    let fixture = fixture().await;
    let store = fixture.store();

    let id = store
        .send("plan_new", r#"{"planId":"p1"}"#.into(), Duration::ZERO)
        .await
        .unwrap();
    store.claim("plan_new", Duration::ZERO, 1).await.unwrap();

    assert!(store.archive("plan_new", id).await.unwrap());
    assert!(!store.archive("plan_new", id).await.unwrap());

    // Terminal: no delete, no visibility change, no claim
    assert!(!store.delete("plan_new", id).await.unwrap());
    assert!(!store
        .set_visibility_timeout("plan_new", id, Duration::ZERO)
        .await
        .unwrap());
    assert!(store.claim("plan_new", VT, 10).await.unwrap().is_empty());

    let archived = store.find("plan_new", id).await.unwrap().unwrap();
    assert!(archived.is_archived());
    assert_eq!(archived.read_count, 1);
}

#[tokio::test]
#[serial]
async fn test_set_visibility_timeout_extends_and_releases() {
    let fixture = fixture().await;
    let store = fixture.store();

    let id = store
        .send("plan_new", r#"{"planId":"p1"}"#.into(), Duration::ZERO)
        .await
        .unwrap();
    store.claim("plan_new", VT, 1).await.unwrap();

    // Release for immediate redelivery
    assert!(store
        .set_visibility_timeout("plan_new", id, Duration::ZERO)
        .await
        .unwrap());
    let again = store.claim("plan_new", VT, 1).await.unwrap();
    assert_eq!(again[0].read_count, 2);

    // Extend repeatedly
    assert!(store
        .set_visibility_timeout("plan_new", id, Duration::from_secs(60))
        .await
        .unwrap());
    assert!(store
        .set_visibility_timeout("plan_new", id, Duration::from_secs(120))
        .await
        .unwrap());
    let found = store.find("plan_new", id).await.unwrap().unwrap();
    assert!(found.visible_at > UniversalTimestamp::now().after(Duration::from_secs(90)));

    store.delete("plan_new", id).await.unwrap();
    assert!(!store
        .set_visibility_timeout("plan_new", id, Duration::ZERO)
        .await
        .unwrap());
}

#[tokio::test]
#[serial]
async fn test_delayed_message_is_hidden_until_due() {
    let fixture = fixture().await;
    let store = fixture.store();

    store
        .send(
            "plan_new",
            r#"{"planId":"p1"}"#.into(),
            Duration::from_millis(300),
        )
        .await
        .unwrap();

    assert!(store.claim("plan_new", VT, 1).await.unwrap().is_empty());
    let metrics = store.metrics("plan_new").await.unwrap();
    assert_eq!(metrics.claimable, 0);
    assert_eq!(metrics.in_flight, 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(store.claim("plan_new", VT, 1).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn test_oversized_delays_saturate_instead_of_wrapping() {
    let fixture = fixture().await;
    let store = fixture.store();

    store
        .send(
            "plan_new",
            r#"{"planId":"far"}"#.into(),
            Duration::from_secs(10_000_000_000_000),
        )
        .await
        .unwrap();
    assert!(store.claim("plan_new", VT, 1).await.unwrap().is_empty());
    store.purge("plan_new").await.unwrap();

    let id = store
        .send("plan_new", r#"{"planId":"held"}"#.into(), Duration::ZERO)
        .await
        .unwrap();
    let first = store.claim("plan_new", VT, 1).await.unwrap();
    assert_eq!(first[0].id, id);

    assert!(store
        .set_visibility_timeout("plan_new", id, Duration::MAX)
        .await
        .unwrap());
    assert!(store.claim("plan_new", VT, 1).await.unwrap().is_empty());

    let held = store.find("plan_new", id).await.unwrap().unwrap();
    assert_eq!(held.visible_at, UniversalTimestamp::max());
    assert_eq!(held.read_count, 1);
}

#[tokio::test]
#[serial]
async fn test_send_batch_returns_ids_in_order() {
    let fixture = fixture().await;
    let store = fixture.store();

    let payloads = (0..4).map(|i| format!(r#"{{"userId":"u{i}"}}"#)).collect();
    let ids = store
        .send_batch("user_new", payloads, Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(ids.len(), 4);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let claimed = store.claim("user_new", VT, 10).await.unwrap();
    assert_eq!(claimed.iter().map(|m| m.id).collect::<Vec<_>>(), ids);
    assert_eq!(claimed[2].payload, r#"{"userId":"u2"}"#);

    assert!(store
        .send_batch("user_new", Vec::new(), Duration::ZERO)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
#[serial]
async fn test_metrics_and_purge() {
    let fixture = fixture().await;
    let store = fixture.store();

    let mut ids = Vec::new();
    for i in 0..4 {
        ids.push(
            store
                .send("plan_map_gen", format!(r#"{{"planId":"p{i}"}}"#), Duration::ZERO)
                .await
                .unwrap(),
        );
    }
    store
        .send("user_new", r#"{"userId":"u1"}"#.into(), Duration::ZERO)
        .await
        .unwrap();

    // One in flight, one archived, two claimable
    store.claim("plan_map_gen", VT, 1).await.unwrap();
    store.archive("plan_map_gen", ids[3]).await.unwrap();

    let metrics = store.metrics("plan_map_gen").await.unwrap();
    assert_eq!(metrics.queue_name, "plan_map_gen");
    assert_eq!(metrics.claimable, 2);
    assert_eq!(metrics.in_flight, 1);
    assert_eq!(metrics.archived, 1);
    assert_eq!(metrics.pending(), 3);
    assert_eq!(metrics.max_read_count, Some(1));
    assert!(metrics.oldest_pending_at.is_some());

    assert_eq!(store.purge("plan_map_gen").await.unwrap(), 3);
    let metrics = store.metrics("plan_map_gen").await.unwrap();
    assert_eq!(metrics.pending(), 0);
    assert_eq!(metrics.archived, 1);
    assert!(metrics.oldest_pending_at.is_none());
    assert!(metrics.max_read_count.is_none());

    // Other queues are untouched
    assert_eq!(store.metrics("user_new").await.unwrap().claimable, 1);

    let cutoff = UniversalTimestamp::now().after(Duration::from_secs(1));
    assert_eq!(store.purge_archived(cutoff).await.unwrap(), 1);
    assert_eq!(store.metrics("plan_map_gen").await.unwrap().archived, 0);
}

#[tokio::test]
#[serial]
async fn test_purge_archived_keeps_recent_archives() {
    let fixture = fixture().await;
    let store = fixture.store();

    let id = store
        .send("plan_new", r#"{"planId":"p1"}"#.into(), Duration::ZERO)
        .await
        .unwrap();
    store.archive("plan_new", id).await.unwrap();

    let an_hour_ago = UniversalTimestamp::from_millis(
        UniversalTimestamp::now().to_millis() - 3_600_000,
    );
    assert_eq!(store.purge_archived(an_hour_ago).await.unwrap(), 0);
    assert!(store.find("plan_new", id).await.unwrap().is_some());
}

#[tokio::test]
#[serial]
async fn test_invalid_queue_name_is_rejected_before_database() {
    let fixture = fixture().await;
    let store = fixture.store();

    let err = store
        .send("plan-new", "{}".into(), Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        QueueError::QueueName(QueueNameError::InvalidCharacters(_))
    ));
    assert!(matches!(
        store.claim("", VT, 1).await,
        Err(QueueError::QueueName(QueueNameError::InvalidLength { .. }))
    ));
}
