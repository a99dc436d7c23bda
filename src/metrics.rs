//! Prometheus metrics for the delivery engine.
//!
//! Exposed gauges and counters match the operational surface: attempts by
//! outcome class, retry-queue depth, DLQ size and movements, and
//! per-subscription consecutive failures.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

/// Labels for delivery attempt counters: event type and outcome class.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AttemptLabels {
    pub event_type: String,
    /// One of `success`, `retryable`, `terminal`.
    pub outcome: String,
}

/// Labels for DLQ movement counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DlqMovementLabels {
    pub reason: String,
}

/// Labels for per-subscription gauges.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SubscriptionLabels {
    pub subscription_id: String,
}

/// All metric families owned by the engine.
pub struct WebhookMetrics {
    /// Delivery attempts by (event_type, outcome class).
    pub attempts_total: Family<AttemptLabels, Counter>,
    /// Deliveries moved to the DLQ by classified reason.
    pub dlq_movements_total: Family<DlqMovementLabels, Counter>,
    /// Deliveries currently waiting in the retry queue.
    pub retry_queue_depth: Gauge,
    /// Total DLQ entries.
    pub dlq_size: Gauge,
    /// Consecutive failures per subscription.
    pub consecutive_failures: Family<SubscriptionLabels, Gauge>,
}

impl WebhookMetrics {
    /// Create the metric families and register them into `registry`.
    #[must_use]
    pub fn new(registry: &mut Registry) -> Self {
        let attempts_total = Family::<AttemptLabels, Counter>::default();
        let dlq_movements_total = Family::<DlqMovementLabels, Counter>::default();
        let retry_queue_depth = Gauge::default();
        let dlq_size = Gauge::default();
        let consecutive_failures = Family::<SubscriptionLabels, Gauge>::default();

        registry.register(
            "webhook_attempts",
            "Delivery attempts by event type and outcome class",
            attempts_total.clone(),
        );
        registry.register(
            "webhook_dlq_movements",
            "Deliveries moved to the dead letter queue by reason",
            dlq_movements_total.clone(),
        );
        registry.register(
            "webhook_retry_queue_depth",
            "Deliveries waiting in the retry queue",
            retry_queue_depth.clone(),
        );
        registry.register(
            "webhook_dlq_size",
            "Entries in the dead letter queue",
            dlq_size.clone(),
        );
        registry.register(
            "webhook_consecutive_failures",
            "Consecutive delivery failures per subscription",
            consecutive_failures.clone(),
        );

        Self {
            attempts_total,
            dlq_movements_total,
            retry_queue_depth,
            dlq_size,
            consecutive_failures,
        }
    }

    /// Create metrics backed by a throwaway registry (tests, embedders that
    /// export elsewhere).
    #[must_use]
    pub fn unregistered() -> Self {
        let mut registry = Registry::default();
        Self::new(&mut registry)
    }

    /// Record one delivery attempt outcome.
    pub fn record_attempt(&self, event_type: &str, outcome_class: &str) {
        self.attempts_total
            .get_or_create(&AttemptLabels {
                event_type: event_type.to_string(),
                outcome: outcome_class.to_string(),
            })
            .inc();
    }

    /// Record a DLQ movement.
    pub fn record_dlq_movement(&self, reason: &str) {
        self.dlq_movements_total
            .get_or_create(&DlqMovementLabels {
                reason: reason.to_string(),
            })
            .inc();
    }

    /// Update the consecutive-failure gauge for a subscription.
    pub fn set_consecutive_failures(&self, subscription_id: uuid::Uuid, failures: u32) {
        self.consecutive_failures
            .get_or_create(&SubscriptionLabels {
                subscription_id: subscription_id.to_string(),
            })
            .set(i64::from(failures));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_record() {
        let mut registry = Registry::default();
        let metrics = WebhookMetrics::new(&mut registry);

        metrics.record_attempt("clip.submitted", "success");
        metrics.record_attempt("clip.submitted", "success");
        metrics.record_attempt("clip.submitted", "retryable");
        metrics.record_dlq_movement("retries_exhausted");
        metrics.retry_queue_depth.set(7);
        metrics.dlq_size.set(3);

        let success = metrics
            .attempts_total
            .get_or_create(&AttemptLabels {
                event_type: "clip.submitted".to_string(),
                outcome: "success".to_string(),
            })
            .get();
        assert_eq!(success, 2);
        assert_eq!(metrics.retry_queue_depth.get(), 7);
        assert_eq!(metrics.dlq_size.get(), 3);
    }

    #[test]
    fn test_consecutive_failures_gauge() {
        let metrics = WebhookMetrics::unregistered();
        let id = uuid::Uuid::new_v4();
        metrics.set_consecutive_failures(id, 12);

        let value = metrics
            .consecutive_failures
            .get_or_create(&SubscriptionLabels {
                subscription_id: id.to_string(),
            })
            .get();
        assert_eq!(value, 12);
    }
}
