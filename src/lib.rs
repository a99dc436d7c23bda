//! Outbound webhook delivery engine for Clipline.
//!
//! Fans business events out to subscriber endpoints with at-least-once
//! semantics: HMAC-SHA256 signed HTTP POST deliveries, exponential backoff
//! retries with jitter, dead-letter quarantine with operator replay, and
//! per-subscription health tracking with automatic deactivation.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod outcome;
pub mod router;
pub mod services;
pub mod signer;
pub mod store;
pub mod validation;
pub mod worker;

pub use config::{BulkReplayConfig, DeliveryConfig, HealthConfig, RetryConfig, WorkerConfig};
pub use error::WebhookError;
pub use metrics::WebhookMetrics;
pub use models::{Delivery, DeliveryStatus, DlqEntry, DlqFilter, Subscription, WebhookPayload};
pub use outcome::{AttemptOutcome, FailureReason, RetryableKind};
pub use router::{webhooks_router, WebhooksState};
pub use services::coordinator::DeliveryCoordinator;
pub use services::dlq_service::DlqService;
pub use services::event_publisher::{EventPublisher, WebhookEvent};
pub use services::executor::DeliveryExecutor;
pub use services::health::{HealthEvent, HealthMonitor, SubscriptionHealth};
pub use services::retry::RetryPolicy;
pub use signer::{HmacSigner, Signer};
pub use store::{DeliveryStore, DlqStore, MemoryStore, SubscriptionStore};
pub use worker::DeliveryWorker;
