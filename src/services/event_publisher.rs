//! Event intake: the seam between the event-producing application and the
//! delivery engine.
//!
//! `publish` is fire-and-forget: it succeeds at the enqueue level and never
//! surfaces delivery failures to the caller. Actual delivery state is only
//! visible through the DLQ and metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A business event to fan out to matching subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl WebhookEvent {
    /// Create an event stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Publisher that hands events to the delivery worker over a broadcast
/// channel.
#[derive(Clone)]
pub struct EventPublisher {
    sender: tokio::sync::broadcast::Sender<WebhookEvent>,
}

impl EventPublisher {
    /// Create a new publisher with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, tokio::sync::broadcast::Receiver<WebhookEvent>) {
        let (sender, receiver) = tokio::sync::broadcast::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Publish an event for asynchronous delivery. Fire-and-forget — errors
    /// are logged but not propagated.
    pub fn publish(&self, event_type: impl Into<String>, data: serde_json::Value) {
        self.publish_event(WebhookEvent::new(event_type, data));
    }

    /// Publish a pre-built event.
    pub fn publish_event(&self, event: WebhookEvent) {
        if let Err(e) = self.sender.send(event) {
            tracing::warn!(
                target: "webhook_delivery",
                error = %e,
                "No active delivery worker to receive event"
            );
        }
    }

    /// Get a new receiver for the broadcast channel.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WebhookEvent> {
        self.sender.subscribe()
    }
}
