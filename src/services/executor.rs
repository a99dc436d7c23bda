//! Delivery attempt execution.
//!
//! One call, one HTTP POST. The executor builds the signed request, enforces
//! the attempt timeout, and classifies the result — it never mutates
//! delivery or subscription state. Routing the outcome is the coordinator's
//! job.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use reqwest::header::HeaderMap;
use reqwest::Client;

use crate::config::DeliveryConfig;
use crate::error::WebhookError;
use crate::models::{Delivery, Subscription};
use crate::outcome::{classify_status, classify_transport_error, AttemptOutcome};
use crate::signer::Signer;

/// Result of one executed attempt: classified outcome plus diagnostics.
#[derive(Debug, Clone)]
pub struct AttemptResult {
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
    /// Response body, capped at the configured byte limit.
    pub response_body: Option<String>,
}

/// Executes single delivery attempts over HTTP.
#[derive(Clone)]
pub struct DeliveryExecutor {
    http_client: Client,
    signer: Arc<dyn Signer>,
    config: DeliveryConfig,
}

impl DeliveryExecutor {
    /// Create a new executor with a shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Internal` if the HTTP client cannot be built.
    pub fn new(config: DeliveryConfig, signer: Arc<dyn Signer>) -> Result<Self, WebhookError> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            signer,
            config,
        })
    }

    /// Execute one delivery attempt against the subscription's URL.
    ///
    /// The caller is responsible for having checked that the subscription is
    /// active; the executor only performs and classifies the network call.
    pub async fn attempt(&self, delivery: &Delivery, subscription: &Subscription) -> AttemptResult {
        let start = Instant::now();

        let payload_bytes = match serde_json::to_vec(&delivery.payload) {
            Ok(b) => b,
            Err(e) => {
                return AttemptResult {
                    outcome: classify_transport_error(
                        false,
                        true,
                        format!("Failed to serialize payload: {e}"),
                    ),
                    latency_ms: 0,
                    response_body: None,
                };
            }
        };

        let timestamp = Utc::now().timestamp().to_string();
        let headers = self.build_headers(delivery, subscription, &timestamp, &payload_bytes);

        let result = self
            .http_client
            .post(&subscription.url)
            .headers(headers)
            .body(payload_bytes)
            .send()
            .await;

        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                let retry_after = parse_retry_after(response.headers());
                let body: String = response
                    .text()
                    .await
                    .unwrap_or_default()
                    .chars()
                    .take(self.config.max_response_bytes)
                    .collect();
                AttemptResult {
                    outcome: classify_status(status, retry_after),
                    latency_ms,
                    response_body: if body.is_empty() { None } else { Some(body) },
                }
            }
            Err(e) => {
                let error_msg = if e.is_timeout() {
                    format!(
                        "Request timeout ({}s)",
                        self.config.request_timeout.as_secs()
                    )
                } else if e.is_connect() {
                    format!("Connection failed: {e}")
                } else {
                    format!("Request error: {e}")
                };
                AttemptResult {
                    outcome: classify_transport_error(e.is_timeout(), e.is_builder(), error_msg),
                    latency_ms,
                    response_body: None,
                }
            }
        }
    }

    /// Assemble the identifying and signature headers.
    ///
    /// SECURITY: Header values are constructed from safe constants and
    /// validated UUIDs, so parse errors should never occur; failed parses
    /// drop the header rather than aborting the attempt.
    fn build_headers(
        &self,
        delivery: &Delivery,
        subscription: &Subscription,
        timestamp: &str,
        payload_bytes: &[u8],
    ) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(v) = "application/json".parse() {
            headers.insert("Content-Type", v);
        }
        if let Ok(v) = delivery.event_type.parse() {
            headers.insert("X-Webhook-Event", v);
        }
        if let Ok(v) = delivery.id.to_string().parse() {
            headers.insert("X-Webhook-Delivery-ID", v);
        }
        if let Ok(v) = delivery.is_replay.to_string().parse() {
            headers.insert("X-Webhook-Replay", v);
        }
        if let Ok(v) = timestamp.parse() {
            headers.insert("X-Webhook-Timestamp", v);
        }

        let signature = self
            .signer
            .sign(&subscription.secret, timestamp, payload_bytes);
        if let Ok(v) = signature.parse() {
            headers.insert("X-Webhook-Signature", v);
        }

        headers
    }
}

/// Parse a Retry-After header into whole seconds.
///
/// Only the seconds form is supported; HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}
