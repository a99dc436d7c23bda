//! Domain records for subscriptions, deliveries, and DLQ entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::outcome::FailureReason;

/// A registered subscriber endpoint interested in a set of event types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub url: String,
    /// Opaque signing credential handed to the signer. Never serialized
    /// into API responses.
    #[serde(skip_serializing)]
    pub secret: String,
    pub event_types: Vec<String>,
    pub active: bool,
    /// Failed deliveries since the last success. Mutated only through the
    /// store's atomic increment/reset operations.
    pub consecutive_failures: u32,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_delivery_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Create an active subscription with a zeroed failure counter.
    #[must_use]
    pub fn new(owner_id: Uuid, url: String, secret: String, event_types: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            url,
            secret,
            event_types,
            active: true,
            consecutive_failures: 0,
            description: None,
            created_at: now,
            updated_at: now,
            last_delivery_at: None,
        }
    }

    /// Whether this subscription wants the given event type.
    #[must_use]
    pub fn matches(&self, event_type: &str) -> bool {
        self.event_types.iter().any(|et| et == event_type)
    }
}

/// Lifecycle state of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Created, waiting for its first attempt.
    Pending,
    /// An attempt is currently executing.
    InFlight,
    /// A 2xx response was received.
    Delivered,
    /// Waiting for its next scheduled attempt.
    Retrying,
    /// Moved to the DLQ; no further automatic attempts.
    DeadLettered,
}

impl DeliveryStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Delivered => "delivered",
            Self::Retrying => "retrying",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

/// One logical notification of an event to one subscription, spanning
/// possibly multiple attempts.
///
/// The id doubles as the idempotency key: it is stable across every attempt
/// of the same logical delivery, including operator replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    /// Immutable event payload as serialized to the subscriber.
    pub payload: serde_json::Value,
    pub status: DeliveryStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// When the next attempt becomes due. None once delivered or dead-lettered.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Claim lease: while set and in the future, scheduler ticks skip this
    /// delivery so two ticks never double-fire one retry.
    pub claimed_until: Option<DateTime<Utc>>,
    pub is_replay: bool,
    pub last_error: Option<String>,
    pub response_code: Option<u16>,
    pub response_body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Delivery {
    /// Create a pending delivery due immediately.
    #[must_use]
    pub fn new(
        subscription_id: Uuid,
        event_id: Uuid,
        event_type: String,
        payload: serde_json::Value,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            subscription_id,
            event_id,
            event_type,
            payload,
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            max_attempts,
            next_attempt_at: Some(now),
            claimed_until: None,
            is_replay: false,
            last_error: None,
            response_code: None,
            response_body: None,
            created_at: now,
            updated_at: now,
            delivered_at: None,
        }
    }

    /// Whether the delivery is waiting for an attempt that is now due.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            DeliveryStatus::Pending | DeliveryStatus::Retrying
        ) && self.next_attempt_at.is_some_and(|at| at <= now)
            && !self.claimed_until.is_some_and(|until| until > now)
    }
}

/// Body POSTed to the subscriber endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// A delivery quarantined after terminal failure or retry exhaustion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub id: Uuid,
    /// Original delivery id, preserved so replay keeps the idempotency key.
    pub delivery_id: Uuid,
    pub subscription_id: Uuid,
    /// Denormalized for operator display.
    pub subscription_url: String,
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub reason: FailureReason,
    pub last_response_code: Option<u16>,
    pub last_error: Option<String>,
    pub attempt_count: u32,
    pub first_attempted_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub replayed_at: Option<DateTime<Utc>>,
}

/// Filter for listing and bulk-replaying DLQ entries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DlqFilter {
    pub subscription_id: Option<Uuid>,
    pub event_type: Option<String>,
    pub reason: Option<FailureReason>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub include_replayed: bool,
}

impl DlqFilter {
    /// Whether an entry matches this filter.
    #[must_use]
    pub fn matches(&self, entry: &DlqEntry) -> bool {
        if !self.include_replayed && entry.replayed_at.is_some() {
            return false;
        }
        if let Some(sub) = self.subscription_id {
            if entry.subscription_id != sub {
                return false;
            }
        }
        if let Some(ref et) = self.event_type {
            if &entry.event_type != et {
                return false;
            }
        }
        if let Some(reason) = self.reason {
            if entry.reason != reason {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.created_at > to {
                return false;
            }
        }
        true
    }
}
