//! Delivery coordination: event fan-out and outcome routing.
//!
//! The coordinator owns the single attempt path every delivery goes
//! through, whether it is attempt 1, a scheduled retry, or an operator
//! replay. Outcome classification decides the route: success bookkeeping,
//! retry scheduling with backoff, or DLQ quarantine.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::WebhookError;
use crate::metrics::WebhookMetrics;
use crate::models::{Delivery, Subscription, WebhookPayload};
use crate::outcome::{AttemptOutcome, FailureReason};
use crate::services::dlq_service::DlqService;
use crate::services::event_publisher::WebhookEvent;
use crate::services::executor::DeliveryExecutor;
use crate::services::health::HealthMonitor;
use crate::services::retry::RetryPolicy;
use crate::store::{DeliveryStore, SubscriptionStore};

/// Orchestrates deliveries from event intake to settled outcome.
pub struct DeliveryCoordinator {
    subscriptions: Arc<dyn SubscriptionStore>,
    deliveries: Arc<dyn DeliveryStore>,
    executor: DeliveryExecutor,
    retry_policy: RetryPolicy,
    health: Arc<HealthMonitor>,
    dlq: Arc<DlqService>,
    metrics: Arc<WebhookMetrics>,
    max_attempts: u32,
}

impl DeliveryCoordinator {
    #[must_use]
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        deliveries: Arc<dyn DeliveryStore>,
        executor: DeliveryExecutor,
        retry_policy: RetryPolicy,
        health: Arc<HealthMonitor>,
        dlq: Arc<DlqService>,
        metrics: Arc<WebhookMetrics>,
        max_attempts: u32,
    ) -> Self {
        Self {
            subscriptions,
            deliveries,
            executor,
            retry_policy,
            health,
            dlq,
            metrics,
            max_attempts,
        }
    }

    /// Fan an event out to all matching active subscriptions.
    ///
    /// Creates one pending delivery per subscription, due immediately, and
    /// returns them for dispatch through the worker pool. Failures here are
    /// logged, never propagated back to the event producer.
    pub async fn fan_out(&self, event: &WebhookEvent) -> Vec<Delivery> {
        let subscriptions = match self
            .subscriptions
            .find_active_by_event_type(&event.event_type)
            .await
        {
            Ok(subs) => subs,
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    error = %e,
                    "Failed to query matching subscriptions"
                );
                return Vec::new();
            }
        };

        if subscriptions.is_empty() {
            tracing::debug!(
                target: "webhook_delivery",
                event_id = %event.event_id,
                event_type = %event.event_type,
                "No active subscriptions match event type"
            );
            return Vec::new();
        }

        tracing::info!(
            target: "webhook_delivery",
            event_id = %event.event_id,
            event_type = %event.event_type,
            subscription_count = subscriptions.len(),
            "Fanning event out to matching subscriptions"
        );

        let payload = WebhookPayload {
            event_id: event.event_id,
            event_type: event.event_type.clone(),
            timestamp: event.timestamp,
            data: event.data.clone(),
        };
        let payload_json = match serde_json::to_value(&payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    event_id = %event.event_id,
                    error = %e,
                    "Failed to serialize webhook payload"
                );
                return Vec::new();
            }
        };

        let mut created = Vec::with_capacity(subscriptions.len());
        for sub in subscriptions {
            let delivery = Delivery::new(
                sub.id,
                event.event_id,
                event.event_type.clone(),
                payload_json.clone(),
                self.max_attempts,
            );
            match self.deliveries.insert(delivery.clone()).await {
                Ok(()) => created.push(delivery),
                Err(e) => {
                    tracing::error!(
                        target: "webhook_delivery",
                        subscription_id = %sub.id,
                        event_id = %event.event_id,
                        error = %e,
                        "Failed to create delivery record"
                    );
                }
            }
        }
        created
    }

    /// Run one attempt for a delivery and route the outcome.
    ///
    /// This is the unified attempt path. Returns `Ok(None)` when the
    /// delivery is already in flight or settled — duplicate triggers from
    /// overlapping scheduler ticks are ignored here.
    pub async fn process_delivery(
        &self,
        delivery_id: Uuid,
    ) -> Result<Option<AttemptOutcome>, WebhookError> {
        let Some(delivery) = self.deliveries.begin_attempt(delivery_id).await? else {
            tracing::debug!(
                target: "webhook_delivery",
                delivery_id = %delivery_id,
                "Skipping delivery attempt: not eligible or already in flight"
            );
            return Ok(None);
        };

        // Re-check the subscription at attempt time; it may have been
        // disabled or deleted while the delivery waited in the queue.
        let subscription = match self.subscriptions.get(delivery.subscription_id).await? {
            Some(sub) if sub.active => sub,
            Some(sub) => {
                let outcome = self
                    .quarantine_inactive(&delivery, Some(&sub), "Subscription is disabled")
                    .await?;
                return Ok(Some(outcome));
            }
            None => {
                let outcome = self
                    .quarantine_inactive(&delivery, None, "Subscription was deleted")
                    .await?;
                return Ok(Some(outcome));
            }
        };

        let result = self.executor.attempt(&delivery, &subscription).await;
        self.metrics
            .record_attempt(&delivery.event_type, result.outcome.class());

        let attempt_count = delivery.attempt_count + 1;
        match &result.outcome {
            AttemptOutcome::Success { status } => {
                self.handle_success(&delivery, &subscription, *status, result.response_body.clone(), result.latency_ms)
                    .await?;
            }
            AttemptOutcome::Retryable {
                retry_after, error, ..
            } => {
                self.handle_retryable(
                    &delivery,
                    &subscription,
                    attempt_count,
                    error,
                    outcome_status(&result.outcome),
                    *retry_after,
                )
                .await?;
            }
            AttemptOutcome::Terminal { reason, error, .. } => {
                self.handle_terminal(
                    &delivery,
                    &subscription,
                    attempt_count,
                    *reason,
                    error,
                    outcome_status(&result.outcome),
                )
                .await?;
            }
        }

        Ok(Some(result.outcome))
    }

    /// Current retry-queue depth, for the stats surface.
    pub async fn queue_depth(&self) -> Result<usize, WebhookError> {
        self.deliveries.queue_depth().await
    }

    async fn handle_success(
        &self,
        delivery: &Delivery,
        subscription: &Subscription,
        status: u16,
        response_body: Option<String>,
        latency_ms: u64,
    ) -> Result<(), WebhookError> {
        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            subscription_id = %subscription.id,
            event_id = %delivery.event_id,
            event_type = %delivery.event_type,
            response_code = status,
            latency_ms,
            attempt_number = delivery.attempt_count + 1,
            is_replay = delivery.is_replay,
            "Webhook delivery succeeded"
        );

        self.deliveries
            .mark_delivered(delivery.id, status, response_body)
            .await?;
        self.health.record_success(subscription).await?;

        if let Err(e) = self
            .subscriptions
            .record_delivery_time(subscription.id, Utc::now())
            .await
        {
            tracing::error!(
                target: "webhook_delivery",
                subscription_id = %subscription.id,
                error = %e,
                "Failed to record last delivery time"
            );
        }
        Ok(())
    }

    async fn handle_retryable(
        &self,
        delivery: &Delivery,
        subscription: &Subscription,
        attempt_count: u32,
        error: &str,
        response_code: Option<u16>,
        retry_after: Option<u64>,
    ) -> Result<(), WebhookError> {
        let retries_left = attempt_count < delivery.max_attempts;

        tracing::warn!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            subscription_id = %subscription.id,
            event_id = %delivery.event_id,
            event_type = %delivery.event_type,
            error = %error,
            attempt_number = attempt_count,
            max_attempts = delivery.max_attempts,
            has_next_retry = retries_left,
            "Webhook delivery failed"
        );

        if retries_left {
            let next_attempt_at = self.retry_policy.next_attempt_at(attempt_count, retry_after);
            self.deliveries
                .mark_retrying(delivery.id, attempt_count, error, response_code, next_attempt_at)
                .await?;
        } else {
            self.deliveries
                .mark_dead_lettered(delivery.id, attempt_count, error, response_code)
                .await?;
            self.dlq
                .quarantine(
                    delivery,
                    subscription.url.clone(),
                    FailureReason::RetriesExhausted,
                    attempt_count,
                    response_code,
                    Some(error.to_string()),
                )
                .await?;
        }

        self.health.record_failure(subscription).await?;
        Ok(())
    }

    async fn handle_terminal(
        &self,
        delivery: &Delivery,
        subscription: &Subscription,
        attempt_count: u32,
        reason: FailureReason,
        error: &str,
        response_code: Option<u16>,
    ) -> Result<(), WebhookError> {
        tracing::warn!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            subscription_id = %subscription.id,
            event_id = %delivery.event_id,
            event_type = %delivery.event_type,
            error = %error,
            reason = reason.as_str(),
            attempt_number = attempt_count,
            "Webhook delivery failed terminally"
        );

        self.deliveries
            .mark_dead_lettered(delivery.id, attempt_count, error, response_code)
            .await?;
        self.dlq
            .quarantine(
                delivery,
                subscription.url.clone(),
                reason,
                attempt_count,
                response_code,
                Some(error.to_string()),
            )
            .await?;

        self.health.record_failure(subscription).await?;
        Ok(())
    }

    /// Quarantine a delivery whose subscription is gone or disabled. The
    /// health counter is left alone: a disabled subscription can no longer
    /// transition, and re-activation resets the counter anyway.
    async fn quarantine_inactive(
        &self,
        delivery: &Delivery,
        subscription: Option<&Subscription>,
        error: &str,
    ) -> Result<AttemptOutcome, WebhookError> {
        let url = subscription.map_or_else(String::new, |s| s.url.clone());

        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            subscription_id = %delivery.subscription_id,
            error,
            "Quarantining delivery for inactive subscription"
        );

        self.metrics.record_attempt(&delivery.event_type, "terminal");
        self.deliveries
            .mark_dead_lettered(delivery.id, delivery.attempt_count, error, None)
            .await?;
        self.dlq
            .quarantine(
                delivery,
                url,
                FailureReason::SubscriptionInactive,
                delivery.attempt_count,
                None,
                Some(error.to_string()),
            )
            .await?;

        Ok(AttemptOutcome::Terminal {
            reason: FailureReason::SubscriptionInactive,
            status: None,
            error: error.to_string(),
        })
    }
}

/// HTTP status carried by an outcome, if any.
fn outcome_status(outcome: &AttemptOutcome) -> Option<u16> {
    match outcome {
        AttemptOutcome::Success { status } => Some(*status),
        AttemptOutcome::Retryable { status, .. } | AttemptOutcome::Terminal { status, .. } => {
            *status
        }
    }
}
