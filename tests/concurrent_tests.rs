//! Integration tests for concurrency guarantees: no double-fire for a
//! single delivery, no serialization across unrelated subscriptions, and
//! correct behavior under concurrent publishes.

mod common;

use std::time::{Duration, Instant};

use common::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer};

use clipline_webhooks::store::{DeliveryStore, DlqStore};
use clipline_webhooks::{DeliveryStatus, WebhookEvent};

/// Two concurrent triggers for the same delivery result in exactly one
/// attempt: the in-flight compare-and-set rejects the duplicate.
#[tokio::test]
async fn test_duplicate_trigger_fires_once() {
    let mock_server = MockServer::start().await;
    let counting = CountingResponder::new().with_delay(200);
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(counting.clone())
        .mount(&mock_server)
        .await;

    let engine = EngineBuilder::new().build();
    engine
        .add_subscription(&format!("{}/webhook", mock_server.uri()), &["clip.submitted"])
        .await;

    let event = WebhookEvent::new("clip.submitted", clip_submitted_data("clip-1"));
    let deliveries = engine.coordinator.fan_out(&event).await;
    let id = deliveries[0].id;

    let (first, second) = tokio::join!(
        engine.coordinator.process_delivery(id),
        engine.coordinator.process_delivery(id),
    );

    let outcomes = [first.unwrap(), second.unwrap()];
    let fired = outcomes.iter().filter(|o| o.is_some()).count();
    assert_eq!(fired, 1, "exactly one trigger may execute the attempt");
    assert_eq!(counting.count(), 1);

    let delivery = DeliveryStore::get(engine.store.as_ref(), id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Delivered);
    assert_eq!(delivery.attempt_count, 1);
}

/// A fast poll interval racing an in-flight slow delivery never produces a
/// second attempt.
#[tokio::test]
async fn test_worker_never_double_fires() {
    let mock_server = MockServer::start().await;
    let counting = CountingResponder::new().with_delay(300);
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(counting.clone())
        .mount(&mock_server)
        .await;

    let mut engine = EngineBuilder::new().start();
    engine
        .add_subscription(&format!("{}/webhook", mock_server.uri()), &["clip.submitted"])
        .await;

    engine
        .publisher
        .publish("clip.submitted", clip_submitted_data("clip-2"));

    // Many 10ms poll ticks elapse while the attempt is in flight.
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(counting.count(), 1, "poll ticks must not re-fire an in-flight delivery");
    engine.shutdown().await;
}

/// Deliveries to different subscriptions run concurrently on the pool, not
/// serially.
#[tokio::test]
async fn test_subscriptions_do_not_serialize() {
    let mock_server = MockServer::start().await;
    let counting = CountingResponder::new().with_delay(400);
    Mock::given(method("POST"))
        .respond_with(counting.clone())
        .mount(&mock_server)
        .await;

    let mut engine = EngineBuilder::new().start();
    for i in 0..4 {
        engine
            .add_subscription(&format!("{}/hook-{i}", mock_server.uri()), &["clip.submitted"])
            .await;
    }

    let start = Instant::now();
    engine
        .publisher
        .publish("clip.submitted", clip_submitted_data("clip-3"));

    let all_done = wait_until(Duration::from_secs(5), || {
        let counting = counting.clone();
        async move { counting.count() == 4 }
    })
    .await;
    assert!(all_done);

    let settled = wait_until(Duration::from_secs(2), || {
        let store = engine.store.clone();
        async move { store.queue_depth().await.unwrap() == 0 }
    })
    .await;
    assert!(settled);

    // Four 400ms deliveries in series would need 1.6s; the pool runs them
    // together.
    let elapsed = start.elapsed();
    assert!(
        elapsed < Duration::from_millis(1200),
        "deliveries appear serialized: {elapsed:?}"
    );
    engine.shutdown().await;
}

/// Concurrent publishes to one subscription all get delivered exactly once.
#[tokio::test]
async fn test_concurrent_publishes() {
    let mock_server = MockServer::start().await;
    let counting = CountingResponder::new();
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(counting.clone())
        .mount(&mock_server)
        .await;

    let mut engine = EngineBuilder::new().start();
    engine
        .add_subscription(&format!("{}/webhook", mock_server.uri()), &["clip.submitted"])
        .await;

    for i in 0..20 {
        engine
            .publisher
            .publish("clip.submitted", clip_submitted_data(&format!("clip-{i}")));
    }

    let all_delivered = wait_until(Duration::from_secs(10), || {
        let counting = counting.clone();
        async move { counting.count() == 20 }
    })
    .await;
    assert!(all_delivered, "expected 20 deliveries, saw {}", counting.count());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(counting.count(), 20, "no delivery may fire twice");
    assert_eq!(DlqStore::size(engine.store.as_ref()).await.unwrap(), 0);
    engine.shutdown().await;
}

/// Failures on one subscription do not affect deliveries to another.
#[tokio::test]
async fn test_failure_isolation_between_subscriptions() {
    let mock_server = MockServer::start().await;
    let healthy = CountingResponder::new();
    let broken = CountingResponder::with_status(500);
    Mock::given(method("POST"))
        .and(path("/healthy"))
        .respond_with(healthy.clone())
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/broken"))
        .respond_with(broken.clone())
        .mount(&mock_server)
        .await;

    let mut engine = EngineBuilder::new().max_attempts(2).start();
    let good = engine
        .add_subscription(&format!("{}/healthy", mock_server.uri()), &["clip.submitted"])
        .await;
    let bad = engine
        .add_subscription(&format!("{}/broken", mock_server.uri()), &["clip.submitted"])
        .await;

    engine
        .publisher
        .publish("clip.submitted", clip_submitted_data("clip-4"));

    let broken_exhausted = wait_until(Duration::from_secs(10), || {
        let store = engine.store.clone();
        async move { DlqStore::size(store.as_ref()).await.unwrap() == 1 }
    })
    .await;
    assert!(broken_exhausted);
    assert_eq!(healthy.count(), 1);
    assert_eq!(broken.count(), 2);

    use clipline_webhooks::store::SubscriptionStore;
    let good_sub = SubscriptionStore::get(engine.store.as_ref(), good.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(good_sub.consecutive_failures, 0);
    assert!(good_sub.active);

    let bad_counter = wait_until(Duration::from_secs(2), || {
        let store = engine.store.clone();
        async move {
            SubscriptionStore::get(store.as_ref(), bad.id)
                .await
                .unwrap()
                .unwrap()
                .consecutive_failures
                == 2
        }
    })
    .await;
    assert!(bad_counter);
    engine.shutdown().await;
}
