//! Storage seam for subscriptions, deliveries, and DLQ entries.
//!
//! The durable persistence engine is an external collaborator; these traits
//! are the surface it plugs into. [`memory::MemoryStore`] is the in-process
//! implementation used by the engine's own tests and by embedders that keep
//! delivery state local.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::error::WebhookError;
use crate::models::{Delivery, DlqEntry, DlqFilter, Subscription};
use crate::outcome::FailureReason;

pub use memory::MemoryStore;

/// Durable record of subscriber endpoints.
///
/// Counter mutations must be atomic per subscription: concurrent deliveries
/// to the same subscription must not lose increments, and unrelated
/// subscriptions must not contend on a shared lock.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn insert(&self, subscription: Subscription) -> Result<(), WebhookError>;

    async fn get(&self, id: Uuid) -> Result<Option<Subscription>, WebhookError>;

    /// Active subscriptions whose event-type set contains `event_type`.
    async fn find_active_by_event_type(
        &self,
        event_type: &str,
    ) -> Result<Vec<Subscription>, WebhookError>;

    /// Atomically increment the consecutive-failure counter, returning the
    /// new value.
    async fn increment_consecutive_failures(&self, id: Uuid) -> Result<u32, WebhookError>;

    /// Atomically reset the consecutive-failure counter to zero.
    async fn reset_consecutive_failures(&self, id: Uuid) -> Result<(), WebhookError>;

    /// Set the active flag.
    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), WebhookError>;

    /// Record the time of the most recent successful delivery.
    async fn record_delivery_time(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), WebhookError>;
}

/// Active delivery tracking, including the time-ordered retry queue.
///
/// The queue is claim-based: `claim_due` leases due items to the caller by
/// setting `claimed_until`, so concurrent scheduler ticks never double-fire
/// the same retry. `begin_attempt` is the second guard: a compare-and-set
/// into `in_flight` that rejects duplicate triggers for one delivery.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn insert(&self, delivery: Delivery) -> Result<(), WebhookError>;

    async fn get(&self, id: Uuid) -> Result<Option<Delivery>, WebhookError>;

    /// Claim up to `limit` due deliveries, leasing them for `lease`.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: usize,
    ) -> Result<Vec<Delivery>, WebhookError>;

    /// Release claims whose lease expired without the attempt completing
    /// (for example a crashed worker). Returns how many were released.
    async fn release_stale_claims(&self, now: DateTime<Utc>) -> Result<usize, WebhookError>;

    /// Transition pending/retrying → in_flight. Returns the refreshed
    /// delivery, or `None` if it is already in flight or no longer eligible.
    async fn begin_attempt(&self, id: Uuid) -> Result<Option<Delivery>, WebhookError>;

    async fn mark_delivered(
        &self,
        id: Uuid,
        response_code: u16,
        response_body: Option<String>,
    ) -> Result<(), WebhookError>;

    async fn mark_retrying(
        &self,
        id: Uuid,
        attempt_count: u32,
        error: &str,
        response_code: Option<u16>,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), WebhookError>;

    async fn mark_dead_lettered(
        &self,
        id: Uuid,
        attempt_count: u32,
        error: &str,
        response_code: Option<u16>,
    ) -> Result<(), WebhookError>;

    /// Remove all pending/retrying deliveries for a subscription (used when
    /// a subscription is auto-disabled). Returns how many were removed.
    async fn abandon_for_subscription(&self, subscription_id: Uuid) -> Result<usize, WebhookError>;

    /// Current retry-queue depth: deliveries waiting for an attempt.
    async fn queue_depth(&self) -> Result<usize, WebhookError>;
}

/// Durable quarantine for permanently-failed deliveries.
#[async_trait]
pub trait DlqStore: Send + Sync {
    async fn insert(&self, entry: DlqEntry) -> Result<(), WebhookError>;

    async fn get(&self, id: Uuid) -> Result<Option<DlqEntry>, WebhookError>;

    /// Entries matching the filter, newest first.
    async fn list(
        &self,
        filter: &DlqFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DlqEntry>, WebhookError>;

    async fn count(&self, filter: &DlqFilter) -> Result<usize, WebhookError>;

    /// Mark an entry replayed. Returns the updated entry or `None` if absent.
    async fn mark_replayed(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<DlqEntry>, WebhookError>;

    /// Permanently discard an entry. Returns whether it existed.
    async fn delete(&self, id: Uuid) -> Result<bool, WebhookError>;

    /// Total entries, replayed included.
    async fn size(&self) -> Result<usize, WebhookError>;
}

/// Build a DLQ entry from a delivery at quarantine time.
#[must_use]
pub fn dlq_entry_from_delivery(
    delivery: &Delivery,
    subscription_url: String,
    reason: FailureReason,
    attempt_count: u32,
    last_response_code: Option<u16>,
    last_error: Option<String>,
) -> DlqEntry {
    DlqEntry {
        id: Uuid::new_v4(),
        delivery_id: delivery.id,
        subscription_id: delivery.subscription_id,
        subscription_url,
        event_id: delivery.event_id,
        event_type: delivery.event_type.clone(),
        payload: delivery.payload.clone(),
        reason,
        last_response_code,
        last_error,
        attempt_count,
        first_attempted_at: delivery.created_at,
        created_at: Utc::now(),
        replayed_at: None,
    }
}
