//! Per-subscription health tracking and queue-depth backpressure.
//!
//! Each subscription moves through {Healthy → Degraded → AutoDisabled} as
//! its consecutive-failure counter grows. One success at any point resets
//! the counter and returns it to Healthy. Auto-disabled subscriptions stay
//! disabled until an operator explicitly re-activates them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::HealthConfig;
use crate::error::WebhookError;
use crate::metrics::WebhookMetrics;
use crate::models::Subscription;
use crate::store::{DeliveryStore, SubscriptionStore};

/// Health state derived from the consecutive-failure counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionHealth {
    Healthy,
    Degraded,
    AutoDisabled,
}

/// Signals emitted for external notification and alerting collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HealthEvent {
    SubscriptionDegraded {
        subscription_id: Uuid,
        consecutive_failures: u32,
    },
    SubscriptionAutoDisabled {
        subscription_id: Uuid,
        consecutive_failures: u32,
    },
    QueueDepthHigh {
        depth: usize,
        high_water: usize,
    },
    QueueDepthRecovered {
        depth: usize,
        high_water: usize,
    },
}

/// Tracks subscription health and retry-queue pressure.
pub struct HealthMonitor {
    config: HealthConfig,
    subscriptions: Arc<dyn SubscriptionStore>,
    deliveries: Arc<dyn DeliveryStore>,
    metrics: Arc<WebhookMetrics>,
    events: tokio::sync::broadcast::Sender<HealthEvent>,
    depth_high: AtomicBool,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(
        config: HealthConfig,
        subscriptions: Arc<dyn SubscriptionStore>,
        deliveries: Arc<dyn DeliveryStore>,
        metrics: Arc<WebhookMetrics>,
    ) -> Self {
        let (events, _) = tokio::sync::broadcast::channel(256);
        Self {
            config,
            subscriptions,
            deliveries,
            metrics,
            events,
            depth_high: AtomicBool::new(false),
        }
    }

    /// Subscribe to health events.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    /// Classify a failure count against the configured thresholds.
    #[must_use]
    pub fn classify(&self, consecutive_failures: u32) -> SubscriptionHealth {
        if consecutive_failures >= self.config.deactivate_threshold {
            SubscriptionHealth::AutoDisabled
        } else if consecutive_failures >= self.config.warn_threshold {
            SubscriptionHealth::Degraded
        } else {
            SubscriptionHealth::Healthy
        }
    }

    /// Record a failed delivery for a subscription and evaluate thresholds.
    ///
    /// Returns the new consecutive-failure count. Crossing the deactivate
    /// threshold disables the subscription, abandons its queued deliveries,
    /// and emits a notification event.
    pub async fn record_failure(&self, subscription: &Subscription) -> Result<u32, WebhookError> {
        let failures = self
            .subscriptions
            .increment_consecutive_failures(subscription.id)
            .await?;
        self.metrics
            .set_consecutive_failures(subscription.id, failures);

        if failures == self.config.warn_threshold {
            tracing::warn!(
                target: "health",
                subscription_id = %subscription.id,
                consecutive_failures = failures,
                "Subscription degraded"
            );
            let _ = self.events.send(HealthEvent::SubscriptionDegraded {
                subscription_id: subscription.id,
                consecutive_failures: failures,
            });
        }

        if failures >= self.config.deactivate_threshold && subscription.active {
            tracing::warn!(
                target: "health",
                subscription_id = %subscription.id,
                consecutive_failures = failures,
                threshold = self.config.deactivate_threshold,
                "Auto-disabling subscription due to consecutive failures"
            );

            self.subscriptions
                .set_active(subscription.id, false)
                .await?;

            // Queued deliveries for a disabled endpoint would all fail;
            // drop them rather than burn attempts.
            match self
                .deliveries
                .abandon_for_subscription(subscription.id)
                .await
            {
                Ok(abandoned) if abandoned > 0 => {
                    tracing::info!(
                        target: "health",
                        subscription_id = %subscription.id,
                        abandoned,
                        "Abandoned queued deliveries for disabled subscription"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(
                        target: "health",
                        subscription_id = %subscription.id,
                        error = %e,
                        "Failed to abandon deliveries for disabled subscription"
                    );
                }
            }

            let _ = self.events.send(HealthEvent::SubscriptionAutoDisabled {
                subscription_id: subscription.id,
                consecutive_failures: failures,
            });
        }

        Ok(failures)
    }

    /// Record a successful delivery: reset the counter and return the
    /// subscription to Healthy.
    pub async fn record_success(&self, subscription: &Subscription) -> Result<(), WebhookError> {
        if subscription.consecutive_failures > 0 {
            self.subscriptions
                .reset_consecutive_failures(subscription.id)
                .await?;
        }
        self.metrics.set_consecutive_failures(subscription.id, 0);
        Ok(())
    }

    /// Explicit operator re-activation of an auto-disabled subscription.
    ///
    /// There is no automatic recovery path; this is the only way back.
    pub async fn reactivate(&self, subscription_id: Uuid) -> Result<(), WebhookError> {
        self.subscriptions
            .reset_consecutive_failures(subscription_id)
            .await?;
        self.subscriptions.set_active(subscription_id, true).await?;
        self.metrics.set_consecutive_failures(subscription_id, 0);
        tracing::info!(
            target: "health",
            subscription_id = %subscription_id,
            "Subscription re-activated by operator"
        );
        Ok(())
    }

    /// Record the current retry-queue depth and emit watermark crossings.
    ///
    /// Depth is a backpressure signal only — it never blocks ingestion.
    pub fn observe_queue_depth(&self, depth: usize) {
        self.metrics.retry_queue_depth.set(depth as i64);

        let was_high = self.depth_high.load(Ordering::Relaxed);
        let is_high = depth > self.config.queue_high_water;

        if is_high && !was_high {
            self.depth_high.store(true, Ordering::Relaxed);
            tracing::warn!(
                target: "health",
                depth,
                high_water = self.config.queue_high_water,
                "Retry queue depth above high-water mark"
            );
            let _ = self.events.send(HealthEvent::QueueDepthHigh {
                depth,
                high_water: self.config.queue_high_water,
            });
        } else if !is_high && was_high {
            self.depth_high.store(false, Ordering::Relaxed);
            tracing::info!(
                target: "health",
                depth,
                high_water = self.config.queue_high_water,
                "Retry queue depth back below high-water mark"
            );
            let _ = self.events.send(HealthEvent::QueueDepthRecovered {
                depth,
                high_water: self.config.queue_high_water,
            });
        }
    }

    /// Sample the queue depth from the delivery store.
    pub async fn sample_queue_depth(&self) -> Result<usize, WebhookError> {
        let depth = self.deliveries.queue_depth().await?;
        self.observe_queue_depth(depth);
        Ok(depth)
    }
}
