//! Common test utilities for integration tests.
//!
//! Provides wiremock responders, a fully-wired in-process engine, and test
//! fixtures for verifying delivery behavior end to end.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use wiremock::{Request, Respond, ResponseTemplate};

use clipline_webhooks::services::coordinator::DeliveryCoordinator;
use clipline_webhooks::services::dlq_service::DlqService;
use clipline_webhooks::services::health::HealthMonitor;
use clipline_webhooks::services::retry::RetryPolicy;
use clipline_webhooks::{
    BulkReplayConfig, DeliveryConfig, DeliveryExecutor, DeliveryWorker, EventPublisher,
    HealthConfig, HmacSigner, MemoryStore, RetryConfig, Subscription, SubscriptionStore,
    WebhookMetrics, WorkerConfig,
};

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

/// Standard test owner IDs
pub const OWNER_1: Uuid = Uuid::from_bytes([
    0xaa, 0xaa, 0x11, 0x11, 0xaa, 0xaa, 0x11, 0x11, 0xaa, 0xaa, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11,
]);

pub const OWNER_2: Uuid = Uuid::from_bytes([
    0xbb, 0xbb, 0x22, 0x22, 0xbb, 0xbb, 0x22, 0x22, 0xbb, 0xbb, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22,
]);

/// Standard test secrets
pub const SECRET_1: &str = "whsec_test_secret_key_12345";
pub const SECRET_2: &str = "whsec_another_secret_67890";

// ---------------------------------------------------------------------------
// CapturedRequest - for inspecting webhook requests
// ---------------------------------------------------------------------------

/// A captured HTTP request with body and headers.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl CapturedRequest {
    /// Parse the body as JSON.
    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// CaptureResponder - captures requests and returns a fixed status
// ---------------------------------------------------------------------------

/// A wiremock responder that captures incoming requests.
#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    response_code: u16,
}

impl CaptureResponder {
    /// Create a new capture responder that returns 200 OK.
    pub fn new() -> Self {
        Self::with_status(200)
    }

    /// Create a capture responder that returns a custom status code.
    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            response_code: status,
        }
    }

    /// Get all captured requests.
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Get the number of captured requests.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for CaptureResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let captured = CapturedRequest {
            body: request.body.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect(),
            timestamp: Utc::now(),
        };
        self.requests.lock().unwrap().push(captured);
        ResponseTemplate::new(self.response_code)
    }
}

// ---------------------------------------------------------------------------
// CountingResponder - counts requests
// ---------------------------------------------------------------------------

/// A wiremock responder that counts incoming requests.
#[derive(Clone)]
pub struct CountingResponder {
    count: Arc<AtomicU32>,
    response_code: u16,
    delay_ms: u64,
}

impl CountingResponder {
    /// Create a new counting responder that returns 200 OK.
    pub fn new() -> Self {
        Self::with_status(200)
    }

    /// Create a counting responder that returns a custom status code.
    pub fn with_status(status: u16) -> Self {
        Self {
            count: Arc::new(AtomicU32::new(0)),
            response_code: status,
            delay_ms: 0,
        }
    }

    /// Add a response delay.
    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Get the current request count.
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Default for CountingResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CountingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.count.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(self.response_code)
            .set_delay(Duration::from_millis(self.delay_ms))
    }
}

// ---------------------------------------------------------------------------
// FailingResponder - fails N times then succeeds
// ---------------------------------------------------------------------------

/// A wiremock responder that fails a specified number of times before
/// succeeding.
#[derive(Clone)]
pub struct FailingResponder {
    attempt_count: Arc<AtomicU32>,
    failures_before_success: u32,
    failure_code: u16,
    success_code: u16,
}

impl FailingResponder {
    /// Create a responder that fails `n` times with 500, then returns 200.
    pub fn fail_times(n: u32) -> Self {
        Self::fail_with_status(n, 500)
    }

    /// Create a responder that fails with a custom status code.
    pub fn fail_with_status(n: u32, failure_code: u16) -> Self {
        Self {
            attempt_count: Arc::new(AtomicU32::new(0)),
            failures_before_success: n,
            failure_code,
            success_code: 200,
        }
    }

    /// Get the current attempt count.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count.load(Ordering::SeqCst)
    }
}

impl Respond for FailingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.attempt_count.fetch_add(1, Ordering::SeqCst);
        if n < self.failures_before_success {
            ResponseTemplate::new(self.failure_code)
        } else {
            ResponseTemplate::new(self.success_code)
        }
    }
}

// ---------------------------------------------------------------------------
// RateLimitResponder - 429 with Retry-After, then succeeds
// ---------------------------------------------------------------------------

/// A wiremock responder that rate-limits the first `n` requests.
#[derive(Clone)]
pub struct RateLimitResponder {
    attempt_count: Arc<AtomicU32>,
    limited_requests: u32,
    retry_after_secs: u64,
}

impl RateLimitResponder {
    pub fn limit_times(n: u32, retry_after_secs: u64) -> Self {
        Self {
            attempt_count: Arc::new(AtomicU32::new(0)),
            limited_requests: n,
            retry_after_secs,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count.load(Ordering::SeqCst)
    }
}

impl Respond for RateLimitResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.attempt_count.fetch_add(1, Ordering::SeqCst);
        if n < self.limited_requests {
            ResponseTemplate::new(429)
                .insert_header("retry-after", self.retry_after_secs.to_string().as_str())
        } else {
            ResponseTemplate::new(200)
        }
    }
}

// ---------------------------------------------------------------------------
// DelayedResponder - adds response delay
// ---------------------------------------------------------------------------

/// A wiremock responder that adds a delay before responding.
#[derive(Clone)]
pub struct DelayedResponder {
    delay_ms: u64,
    response_code: u16,
}

impl DelayedResponder {
    /// Create a responder that delays for `ms` milliseconds.
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            response_code: 200,
        }
    }

    /// Create a delayed responder with a custom status code.
    pub fn with_status(delay_ms: u64, response_code: u16) -> Self {
        Self {
            delay_ms,
            response_code,
        }
    }
}

impl Respond for DelayedResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        ResponseTemplate::new(self.response_code)
            .set_delay(Duration::from_millis(self.delay_ms))
    }
}

// ---------------------------------------------------------------------------
// Engine harness
// ---------------------------------------------------------------------------

/// Builder for a fully-wired in-process engine.
pub struct EngineBuilder {
    delivery: DeliveryConfig,
    retry: RetryConfig,
    health: HealthConfig,
    worker: WorkerConfig,
    bulk: BulkReplayConfig,
}

impl EngineBuilder {
    /// Fast test defaults: HTTP allowed, millisecond backoff, tight polls.
    pub fn new() -> Self {
        Self {
            delivery: DeliveryConfig::default().with_allow_http(true),
            retry: RetryConfig::for_testing(),
            health: HealthConfig::default(),
            worker: WorkerConfig::for_testing(),
            bulk: BulkReplayConfig::default(),
        }
    }

    pub fn max_attempts(mut self, max: u32) -> Self {
        self.delivery = self.delivery.with_max_attempts(max);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.delivery = self.delivery.with_request_timeout(timeout);
        self
    }

    pub fn health_thresholds(mut self, warn: u32, deactivate: u32) -> Self {
        self.health.warn_threshold = warn;
        self.health.deactivate_threshold = deactivate;
        self
    }

    pub fn queue_high_water(mut self, high_water: usize) -> Self {
        self.health.queue_high_water = high_water;
        self
    }

    pub fn bulk_rates(mut self, normal: u32, emergency: u32) -> Self {
        self.bulk.normal_max_per_sec = normal;
        self.bulk.emergency_max_per_sec = emergency;
        self
    }

    /// Wire the engine without starting the background worker.
    pub fn build(self) -> TestEngine {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(WebhookMetrics::unregistered());

        let health = Arc::new(HealthMonitor::new(
            self.health,
            store.clone(),
            store.clone(),
            metrics.clone(),
        ));

        let executor = DeliveryExecutor::new(self.delivery.clone(), Arc::new(HmacSigner))
            .expect("failed to build executor");

        let dlq = Arc::new(DlqService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            metrics.clone(),
            self.delivery.clone(),
            self.bulk,
        ));

        let coordinator = Arc::new(DeliveryCoordinator::new(
            store.clone(),
            store.clone(),
            executor,
            RetryPolicy::new(self.retry),
            health.clone(),
            dlq.clone(),
            metrics.clone(),
            self.delivery.max_attempts,
        ));
        dlq.set_coordinator(coordinator.clone());

        let (publisher, receiver) = EventPublisher::new(self.worker.event_channel_capacity);
        let worker = Arc::new(DeliveryWorker::new(
            coordinator.clone(),
            store.clone(),
            health.clone(),
            self.worker,
        ));

        TestEngine {
            store,
            metrics,
            publisher,
            receiver: Some(receiver),
            coordinator,
            dlq,
            health,
            worker,
            worker_handle: None,
        }
    }

    /// Wire the engine and start the background worker.
    pub fn start(self) -> TestEngine {
        let mut engine = self.build();
        engine.start_worker();
        engine
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A wired engine over the in-memory store.
pub struct TestEngine {
    pub store: Arc<MemoryStore>,
    pub metrics: Arc<WebhookMetrics>,
    pub publisher: EventPublisher,
    receiver: Option<tokio::sync::broadcast::Receiver<clipline_webhooks::WebhookEvent>>,
    pub coordinator: Arc<DeliveryCoordinator>,
    pub dlq: Arc<DlqService>,
    pub health: Arc<HealthMonitor>,
    pub worker: Arc<DeliveryWorker>,
    worker_handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestEngine {
    /// Spawn the worker loop.
    pub fn start_worker(&mut self) {
        let receiver = self
            .receiver
            .take()
            .expect("worker already started");
        let worker = self.worker.clone();
        self.worker_handle = Some(tokio::spawn(async move {
            worker.run(receiver).await;
        }));
    }

    /// Register an active subscription.
    pub async fn add_subscription(&self, url: &str, event_types: &[&str]) -> Subscription {
        let sub = Subscription::new(
            OWNER_1,
            url.to_string(),
            SECRET_1.to_string(),
            event_types.iter().map(|s| (*s).to_string()).collect(),
        );
        SubscriptionStore::insert(self.store.as_ref(), sub.clone())
            .await
            .expect("failed to insert subscription");
        sub
    }

    /// Stop the worker and wait for it to drain.
    pub async fn shutdown(&mut self) {
        self.worker.shutdown();
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.await;
        }
    }
}

/// Poll `check` until it returns true or the timeout elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

/// Payload for a clip.submitted event.
pub fn clip_submitted_data(clip_id: &str) -> serde_json::Value {
    serde_json::json!({
        "clip_id": clip_id,
        "submitter_id": OWNER_1.to_string(),
        "title": "Test clip",
    })
}

/// Payload for a user.banned event.
pub fn user_banned_data(user_id: Uuid) -> serde_json::Value {
    serde_json::json!({
        "user_id": user_id.to_string(),
        "reason": "spam",
    })
}
