//! In-process store implementation.
//!
//! Subscriptions live behind a per-key mutex map so failure-counter updates
//! for one subscription never contend with deliveries to another. The
//! delivery and DLQ maps take a single lock per operation; claim leasing
//! happens inside the dequeue lock so two scheduler ticks can never claim
//! the same delivery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::WebhookError;
use crate::models::{Delivery, DeliveryStatus, DlqEntry, DlqFilter, Subscription};
use crate::store::{DeliveryStore, DlqStore, SubscriptionStore};

/// In-memory implementation of all three store traits.
#[derive(Default)]
pub struct MemoryStore {
    subscriptions: RwLock<HashMap<Uuid, Arc<Mutex<Subscription>>>>,
    deliveries: RwLock<HashMap<Uuid, Delivery>>,
    dlq: RwLock<HashMap<Uuid, DlqEntry>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a subscription entry handle.
    async fn subscription_entry(
        &self,
        id: Uuid,
    ) -> Result<Arc<Mutex<Subscription>>, WebhookError> {
        let subs = self.subscriptions.read().await;
        subs.get(&id)
            .cloned()
            .ok_or(WebhookError::SubscriptionNotFound)
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn insert(&self, subscription: Subscription) -> Result<(), WebhookError> {
        let mut subs = self.subscriptions.write().await;
        subs.insert(subscription.id, Arc::new(Mutex::new(subscription)));
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Subscription>, WebhookError> {
        let subs = self.subscriptions.read().await;
        Ok(subs
            .get(&id)
            .map(|entry| entry.lock().expect("subscription lock poisoned").clone()))
    }

    async fn find_active_by_event_type(
        &self,
        event_type: &str,
    ) -> Result<Vec<Subscription>, WebhookError> {
        let subs = self.subscriptions.read().await;
        let mut matching: Vec<Subscription> = subs
            .values()
            .map(|entry| entry.lock().expect("subscription lock poisoned").clone())
            .filter(|s| s.active && s.matches(event_type))
            .collect();
        matching.sort_by_key(|s| s.created_at);
        Ok(matching)
    }

    async fn increment_consecutive_failures(&self, id: Uuid) -> Result<u32, WebhookError> {
        let entry = self.subscription_entry(id).await?;
        let mut sub = entry.lock().expect("subscription lock poisoned");
        sub.consecutive_failures += 1;
        sub.updated_at = Utc::now();
        Ok(sub.consecutive_failures)
    }

    async fn reset_consecutive_failures(&self, id: Uuid) -> Result<(), WebhookError> {
        let entry = self.subscription_entry(id).await?;
        let mut sub = entry.lock().expect("subscription lock poisoned");
        sub.consecutive_failures = 0;
        sub.updated_at = Utc::now();
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), WebhookError> {
        let entry = self.subscription_entry(id).await?;
        let mut sub = entry.lock().expect("subscription lock poisoned");
        sub.active = active;
        sub.updated_at = Utc::now();
        Ok(())
    }

    async fn record_delivery_time(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), WebhookError> {
        let entry = self.subscription_entry(id).await?;
        let mut sub = entry.lock().expect("subscription lock poisoned");
        sub.last_delivery_at = Some(at);
        sub.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl DeliveryStore for MemoryStore {
    async fn insert(&self, delivery: Delivery) -> Result<(), WebhookError> {
        let mut deliveries = self.deliveries.write().await;
        // Replay re-creates a delivery under its original id, replacing the
        // dead-lettered record.
        deliveries.insert(delivery.id, delivery);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Delivery>, WebhookError> {
        let deliveries = self.deliveries.read().await;
        Ok(deliveries.get(&id).cloned())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: usize,
    ) -> Result<Vec<Delivery>, WebhookError> {
        let mut deliveries = self.deliveries.write().await;

        let mut due: Vec<Uuid> = deliveries
            .values()
            .filter(|d| d.is_due(now))
            .map(|d| d.id)
            .collect();
        due.sort_by_key(|id| deliveries[id].next_attempt_at);
        due.truncate(limit);

        let lease_until = now
            + chrono::Duration::from_std(lease)
                .map_err(|e| WebhookError::Internal(format!("invalid lease duration: {e}")))?;

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(d) = deliveries.get_mut(&id) {
                d.claimed_until = Some(lease_until);
                d.updated_at = now;
                claimed.push(d.clone());
            }
        }
        Ok(claimed)
    }

    async fn release_stale_claims(&self, now: DateTime<Utc>) -> Result<usize, WebhookError> {
        let mut deliveries = self.deliveries.write().await;
        let mut released = 0;
        for d in deliveries.values_mut() {
            let expired = d.claimed_until.is_some_and(|until| until <= now);
            if !expired {
                continue;
            }
            match d.status {
                DeliveryStatus::Pending | DeliveryStatus::Retrying => {
                    d.claimed_until = None;
                    d.updated_at = now;
                    released += 1;
                }
                // A worker died mid-attempt; put the delivery back in the
                // queue without consuming an attempt.
                DeliveryStatus::InFlight => {
                    d.status = DeliveryStatus::Retrying;
                    d.claimed_until = None;
                    d.next_attempt_at = Some(now);
                    d.updated_at = now;
                    released += 1;
                }
                DeliveryStatus::Delivered | DeliveryStatus::DeadLettered => {
                    d.claimed_until = None;
                }
            }
        }
        Ok(released)
    }

    async fn begin_attempt(&self, id: Uuid) -> Result<Option<Delivery>, WebhookError> {
        let mut deliveries = self.deliveries.write().await;
        let Some(d) = deliveries.get_mut(&id) else {
            return Ok(None);
        };
        match d.status {
            DeliveryStatus::Pending | DeliveryStatus::Retrying => {
                d.status = DeliveryStatus::InFlight;
                d.updated_at = Utc::now();
                Ok(Some(d.clone()))
            }
            // Already in flight or settled — duplicate trigger, ignore.
            _ => Ok(None),
        }
    }

    async fn mark_delivered(
        &self,
        id: Uuid,
        response_code: u16,
        response_body: Option<String>,
    ) -> Result<(), WebhookError> {
        let mut deliveries = self.deliveries.write().await;
        let d = deliveries.get_mut(&id).ok_or(WebhookError::DeliveryNotFound)?;
        let now = Utc::now();
        d.status = DeliveryStatus::Delivered;
        d.attempt_count += 1;
        d.response_code = Some(response_code);
        d.response_body = response_body;
        d.last_error = None;
        d.next_attempt_at = None;
        d.claimed_until = None;
        d.delivered_at = Some(now);
        d.updated_at = now;
        Ok(())
    }

    async fn mark_retrying(
        &self,
        id: Uuid,
        attempt_count: u32,
        error: &str,
        response_code: Option<u16>,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        let mut deliveries = self.deliveries.write().await;
        let d = deliveries.get_mut(&id).ok_or(WebhookError::DeliveryNotFound)?;
        d.status = DeliveryStatus::Retrying;
        d.attempt_count = attempt_count;
        d.last_error = Some(error.to_string());
        d.response_code = response_code;
        d.next_attempt_at = Some(next_attempt_at);
        d.claimed_until = None;
        d.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_dead_lettered(
        &self,
        id: Uuid,
        attempt_count: u32,
        error: &str,
        response_code: Option<u16>,
    ) -> Result<(), WebhookError> {
        let mut deliveries = self.deliveries.write().await;
        let d = deliveries.get_mut(&id).ok_or(WebhookError::DeliveryNotFound)?;
        d.status = DeliveryStatus::DeadLettered;
        d.attempt_count = attempt_count;
        d.last_error = Some(error.to_string());
        d.response_code = response_code;
        d.next_attempt_at = None;
        d.claimed_until = None;
        d.updated_at = Utc::now();
        Ok(())
    }

    async fn abandon_for_subscription(&self, subscription_id: Uuid) -> Result<usize, WebhookError> {
        let mut deliveries = self.deliveries.write().await;
        let to_remove: Vec<Uuid> = deliveries
            .values()
            .filter(|d| {
                d.subscription_id == subscription_id
                    && matches!(
                        d.status,
                        DeliveryStatus::Pending | DeliveryStatus::Retrying
                    )
            })
            .map(|d| d.id)
            .collect();
        for id in &to_remove {
            deliveries.remove(id);
        }
        Ok(to_remove.len())
    }

    async fn queue_depth(&self) -> Result<usize, WebhookError> {
        let deliveries = self.deliveries.read().await;
        Ok(deliveries
            .values()
            .filter(|d| {
                matches!(
                    d.status,
                    DeliveryStatus::Pending | DeliveryStatus::Retrying
                )
            })
            .count())
    }
}

#[async_trait]
impl DlqStore for MemoryStore {
    async fn insert(&self, entry: DlqEntry) -> Result<(), WebhookError> {
        let mut dlq = self.dlq.write().await;
        dlq.insert(entry.id, entry);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DlqEntry>, WebhookError> {
        let dlq = self.dlq.read().await;
        Ok(dlq.get(&id).cloned())
    }

    async fn list(
        &self,
        filter: &DlqFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DlqEntry>, WebhookError> {
        let dlq = self.dlq.read().await;
        let mut matching: Vec<DlqEntry> = dlq
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self, filter: &DlqFilter) -> Result<usize, WebhookError> {
        let dlq = self.dlq.read().await;
        Ok(dlq.values().filter(|e| filter.matches(e)).count())
    }

    async fn mark_replayed(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<DlqEntry>, WebhookError> {
        let mut dlq = self.dlq.write().await;
        Ok(dlq.get_mut(&id).map(|e| {
            e.replayed_at = Some(at);
            e.clone()
        }))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, WebhookError> {
        let mut dlq = self.dlq.write().await;
        Ok(dlq.remove(&id).is_some())
    }

    async fn size(&self) -> Result<usize, WebhookError> {
        let dlq = self.dlq.read().await;
        Ok(dlq.len())
    }
}
