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


//! Consumer tests: delivery scenarios, stopping and supervision.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ridi_messaging::registry::{
    PlanNew, PlanNewPayload, RouteMapGen, RouteMapGenPayload, UserNew, UserNewPayload,
};
use ridi_messaging::{
    AckActions, Concurrency, Delivery, MessageHandler, Messaging, PayloadError, Queue,
    QueueMessage,
};
use serial_test::serial;
use tokio::sync::Notify;

use crate::fixtures::{fast_config, fixture, wait_until};

/// A plan_new message handled with limit 1 is deleted and not seen again.
#[tokio::test]
#[serial]
async fn test_single_message_is_processed_and_deleted() {
    let fixture = fixture().await;
    let producer = fixture.producer();
    let consumer = fixture.consumer(fast_config().build());

    let id = producer
        .send::<PlanNew>(&PlanNewPayload::new("p1"))
        .await
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let mut listener = consumer.listener::<PlanNew, _>(
        move |delivery: Delivery<PlanNewPayload>| {
            let recorder = recorder.clone();
            async move {
                recorder
                    .lock()
                    .unwrap()
                    .push((delivery.message.id, delivery.data.plan_id.clone()));
                assert_eq!(delivery.message.read_count, 1);
                delivery.actions.delete_message().await?;
                anyhow::Ok(())
            }
        },
        Concurrency::bounded(1),
    );

    assert_eq!(listener.poll_once().await.unwrap(), 1);
    assert_eq!(*seen.lock().unwrap(), vec![(id, "p1".to_string())]);

    assert_eq!(listener.poll_once().await.unwrap(), 0);
    assert!(fixture.store().find(PlanNew::NAME, id).await.unwrap().is_none());
}

/// Of three messages, only the one whose handler failed comes back.
#[tokio::test]
#[serial]
async fn test_failed_message_is_redelivered_alone() {
    let fixture = fixture().await;
    let producer = fixture.producer();
    let store = fixture.store();
    let vt = Duration::from_millis(300);
    let consumer = fixture.consumer(fast_config().visibility_timeout(vt).build());

    let payloads: Vec<RouteMapGenPayload> = ["r1", "r2", "r3"]
        .iter()
        .map(|r| RouteMapGenPayload {
            route_id: r.to_string(),
        })
        .collect();
    let ids = producer.send_batch::<RouteMapGen>(&payloads).await.unwrap();

    let mut listener = consumer.listener::<RouteMapGen, _>(
        |delivery: Delivery<RouteMapGenPayload>| async move {
            if delivery.data.route_id == "r2" {
                anyhow::bail!("preview render failed");
            }
            delivery.actions.delete_message().await?;
            anyhow::Ok(())
        },
        Concurrency::bounded(3),
    );

    assert_eq!(listener.poll_once().await.unwrap(), 3);
    assert!(store.claim(RouteMapGen::NAME, vt, 10).await.unwrap().is_empty());

    tokio::time::sleep(vt + Duration::from_millis(100)).await;

    let redelivered = store.claim(RouteMapGen::NAME, vt, 10).await.unwrap();
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].id, ids[1]);
    assert_eq!(redelivered[0].read_count, 2);
}

/// Two listeners with limit 5 share ten messages; each is handled once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_two_listeners_deliver_each_message_once() {
    let fixture = fixture().await;
    let producer = fixture.producer();
    let consumer = fixture.consumer(fast_config().build());

    let payloads: Vec<UserNewPayload> = (0..10)
        .map(|i| UserNewPayload {
            user_id: format!("u{i}"),
        })
        .collect();
    producer.send_batch::<UserNew>(&payloads).await.unwrap();

    let deliveries: Arc<Mutex<HashMap<i64, u32>>> = Arc::new(Mutex::new(HashMap::new()));
    for _ in 0..2 {
        let deliveries = deliveries.clone();
        consumer.listen::<UserNew, _>(
            move |delivery: Delivery<UserNewPayload>| {
                let deliveries = deliveries.clone();
                async move {
                    *deliveries
                        .lock()
                        .unwrap()
                        .entry(delivery.message.id)
                        .or_insert(0) += 1;
                    delivery.actions.delete_message().await?;
                    anyhow::Ok(())
                }
            },
            Concurrency::bounded(5),
        );
    }
    assert_eq!(consumer.listener_count(), 2);

    let all_seen = wait_until(Duration::from_secs(10), || {
        deliveries.lock().unwrap().len() == 10
    })
    .await;
    assert!(all_seen, "not every message was delivered");

    consumer.stop();
    consumer.join().await;

    let deliveries = deliveries.lock().unwrap();
    assert!(deliveries.values().all(|&count| count == 1), "{deliveries:?}");
    assert_eq!(
        fixture
            .store()
            .metrics(UserNew::NAME)
            .await
            .unwrap()
            .pending(),
        0
    );
}

#[tokio::test]
#[serial]
async fn test_stop_wakes_idle_listener() {
    let fixture = fixture().await;
    let consumer = fixture.consumer(
        fast_config()
            .poll_interval(Duration::from_secs(30))
            .max_poll_wait(Duration::from_secs(60))
            .build(),
    );

    consumer.listen::<PlanNew, _>(
        |_delivery: Delivery<PlanNewPayload>| async move { anyhow::Ok(()) },
        Concurrency::default(),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(consumer.is_running());

    consumer.stop();
    assert!(!consumer.is_running());
    tokio::time::timeout(Duration::from_secs(2), consumer.join())
        .await
        .expect("listener did not stop promptly");
    assert_eq!(consumer.listener_count(), 0);
}

#[tokio::test]
#[serial]
async fn test_stop_lets_in_flight_handler_finish() {
    let fixture = fixture().await;
    let producer = fixture.producer();
    let consumer = fixture.consumer(fast_config().build());

    let id = producer
        .send::<PlanNew>(&PlanNewPayload::new("slow"))
        .await
        .unwrap();

    let started = Arc::new(Notify::new());
    let finished = Arc::new(AtomicBool::new(false));
    let (started_tx, finished_tx) = (started.clone(), finished.clone());

    let notified = started.notified();
    tokio::pin!(notified);
    notified.as_mut().enable();

    consumer.listen::<PlanNew, _>(
        move |delivery: Delivery<PlanNewPayload>| {
            let started = started_tx.clone();
            let finished = finished_tx.clone();
            async move {
                started.notify_one();
                tokio::time::sleep(Duration::from_millis(300)).await;
                delivery.actions.delete_message().await?;
                finished.store(true, Ordering::SeqCst);
                anyhow::Ok(())
            }
        },
        Concurrency::bounded(1),
    );

    tokio::time::timeout(Duration::from_secs(5), notified)
        .await
        .expect("handler never started");
    consumer.stop();
    consumer.join().await;

    assert!(finished.load(Ordering::SeqCst));
    assert!(fixture.store().find(PlanNew::NAME, id).await.unwrap().is_none());
}

struct Misnamed;

impl Queue for Misnamed {
    const NAME: &'static str = "not a queue";
    type Payload = PlanNewPayload;
}

/// Every cycle fails on the invalid queue name, so the supervisor gives up.
#[tokio::test]
#[serial]
async fn test_listener_gives_up_after_repeated_failures() {
    let fixture = fixture().await;
    let consumer = fixture.consumer(
        fast_config()
            .max_consecutive_failures(3)
            .failure_backoff(Duration::from_millis(10))
            .build(),
    );

    consumer.listen::<Misnamed, _>(
        |_delivery: Delivery<PlanNewPayload>| async move { anyhow::Ok(()) },
        Concurrency::default(),
    );

    let crashed = wait_until(Duration::from_secs(5), || !consumer.is_running()).await;
    assert!(crashed, "consumer kept running after repeated failures");
    tokio::time::timeout(Duration::from_secs(2), consumer.join())
        .await
        .expect("crashed listener did not exit");
}

/// A listener sleeping off a failure exits as soon as the consumer stops.
#[tokio::test]
#[serial]
async fn test_stop_interrupts_failure_backoff() {
    let fixture = fixture().await;
    let consumer = fixture.consumer(
        fast_config()
            .max_consecutive_failures(100)
            .failure_backoff(Duration::from_secs(60))
            .build(),
    );

    consumer.listen::<Misnamed, _>(
        |_delivery: Delivery<PlanNewPayload>| async move { anyhow::Ok(()) },
        Concurrency::default(),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(consumer.is_running());

    consumer.stop();
    tokio::time::timeout(Duration::from_secs(2), consumer.join())
        .await
        .expect("listener waited out its backoff after stop");
}

#[tokio::test]
#[serial]
async fn test_undecodable_message_is_left_for_redelivery_by_default() {
    let fixture = fixture().await;
    let store = fixture.store();
    let consumer = fixture.consumer(fast_config().build());

    let id = store
        .send(PlanNew::NAME, r#"{"routeId":"r1"}"#.into(), Duration::ZERO)
        .await
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut listener = consumer.listener::<PlanNew, _>(
        move |_delivery: Delivery<PlanNewPayload>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { anyhow::Ok(()) }
        },
        Concurrency::default(),
    );

    assert_eq!(listener.poll_once().await.unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let message = store.find(PlanNew::NAME, id).await.unwrap().unwrap();
    assert_eq!(message.read_count, 1);
    assert!(!message.is_archived());
}

/// Archives anything that does not decode.
struct ArchivingHandler {
    rejected: Arc<Mutex<Vec<i64>>>,
}

#[async_trait]
impl MessageHandler<PlanNew> for ArchivingHandler {
    async fn handle(&self, delivery: Delivery<PlanNewPayload>) -> anyhow::Result<()> {
        delivery.actions.delete_message().await?;
        anyhow::Ok(())
    }

    async fn handle_invalid(
        &self,
        message: QueueMessage,
        error: PayloadError,
        actions: AckActions,
    ) -> anyhow::Result<()> {
        assert!(matches!(error, PayloadError::Decode { .. }));
        self.rejected.lock().unwrap().push(message.id);
        actions.archive_message().await?;
        anyhow::Ok(())
    }
}

#[tokio::test]
#[serial]
async fn test_handler_can_archive_poison_messages() {
    let fixture = fixture().await;
    let store = fixture.store();
    let producer = fixture.producer();
    let consumer = fixture.consumer(fast_config().build());

    let poison = store
        .send(PlanNew::NAME, "not json".into(), Duration::ZERO)
        .await
        .unwrap();
    let good = producer
        .send::<PlanNew>(&PlanNewPayload::new("p1"))
        .await
        .unwrap();

    let rejected = Arc::new(Mutex::new(Vec::new()));
    let mut listener = consumer.listener::<PlanNew, _>(
        ArchivingHandler {
            rejected: rejected.clone(),
        },
        Concurrency::bounded(2),
    );
    assert_eq!(listener.poll_once().await.unwrap(), 2);

    assert_eq!(*rejected.lock().unwrap(), vec![poison]);
    assert!(store
        .find(PlanNew::NAME, poison)
        .await
        .unwrap()
        .unwrap()
        .is_archived());
    assert!(store.find(PlanNew::NAME, good).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn test_unbounded_listener_does_not_wait_for_handlers() {
    let fixture = fixture().await;
    let producer = fixture.producer();
    let consumer = fixture.consumer(fast_config().batch_ceiling(4).build());

    let payloads: Vec<PlanNewPayload> = (0..6)
        .map(|i| PlanNewPayload::new(format!("p{i}")))
        .collect();
    producer.send_batch::<PlanNew>(&payloads).await.unwrap();

    let done = Arc::new(AtomicUsize::new(0));
    let counter = done.clone();
    let mut listener = consumer.listener::<PlanNew, _>(
        move |delivery: Delivery<PlanNewPayload>| {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                delivery.actions.delete_message().await?;
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        },
        Concurrency::Unbounded,
    );

    // Claims up to the ceiling and returns while handlers still run
    assert_eq!(listener.poll_once().await.unwrap(), 4);
    assert_eq!(listener.in_flight(), 4);
    assert_eq!(done.load(Ordering::SeqCst), 0);

    assert_eq!(listener.poll_once().await.unwrap(), 2);

    let all_done =
        wait_until(Duration::from_secs(5), || done.load(Ordering::SeqCst) == 6).await;
    assert!(all_done);
}

#[tokio::test]
#[serial]
async fn test_messaging_facade_end_to_end() {
    let fixture = fixture().await;
    let messaging = Messaging::new(fixture.database(), fast_config().build());

    let processed = Arc::new(AtomicUsize::new(0));
    let counter = processed.clone();
    messaging.listen::<PlanNew, _>(
        move |delivery: Delivery<PlanNewPayload>| {
            let counter = counter.clone();
            async move {
                delivery.actions.delete_message().await?;
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        },
        Concurrency::bounded(2),
    );

    messaging
        .send::<PlanNew>(&PlanNewPayload::new("p1"))
        .await
        .unwrap();
    messaging
        .send::<PlanNew>(&PlanNewPayload::new("p2"))
        .await
        .unwrap();

    let all = wait_until(Duration::from_secs(5), || {
        processed.load(Ordering::SeqCst) == 2
    })
    .await;
    assert!(all);

    messaging.stop();
    messaging.join().await;
    assert!(!messaging.is_running());
}
