//! Error types for the webhook delivery engine.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Webhook engine error variants.
///
/// Delivery-path failures (network errors, non-2xx responses) are not errors
/// at this level — they are classified outcomes routed to the retry queue or
/// the DLQ. This enum covers operator-facing and internal failures, which do
/// propagate to the caller.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("SSRF protection: {0}")]
    SsrfDetected(String),

    #[error("Subscription not found")]
    SubscriptionNotFound,

    #[error("Subscription is inactive")]
    SubscriptionInactive,

    #[error("Delivery not found")]
    DeliveryNotFound,

    #[error("DLQ entry not found")]
    DlqEntryNotFound,

    #[error("Bulk replay job not found")]
    ReplayJobNotFound,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Store(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// JSON error response returned by operator API endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            WebhookError::InvalidUrl(_) => (StatusCode::BAD_REQUEST, "invalid_url"),
            WebhookError::SsrfDetected(_) => (StatusCode::BAD_REQUEST, "ssrf_detected"),
            WebhookError::SubscriptionNotFound => (StatusCode::NOT_FOUND, "subscription_not_found"),
            WebhookError::SubscriptionInactive => (StatusCode::CONFLICT, "subscription_inactive"),
            WebhookError::DeliveryNotFound => (StatusCode::NOT_FOUND, "delivery_not_found"),
            WebhookError::DlqEntryNotFound => (StatusCode::NOT_FOUND, "dlq_entry_not_found"),
            WebhookError::ReplayJobNotFound => (StatusCode::NOT_FOUND, "replay_job_not_found"),
            WebhookError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            WebhookError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            WebhookError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
            status: status.as_u16(),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, WebhookError>;
