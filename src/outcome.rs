//! Delivery attempt outcome classification.
//!
//! The retryable/terminal decision is the single most consequential branch
//! in the engine, so it lives in one pure function over the response status
//! rather than being spread across call sites.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Why a retryable failure is retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryableKind {
    /// Connection refused, DNS failure, TLS failure.
    Network,
    /// The attempt exceeded the request timeout.
    Timeout,
    /// HTTP 429 from the subscriber.
    RateLimited,
    /// HTTP 5xx from the subscriber.
    ServerError,
}

impl RetryableKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
        }
    }
}

/// Classified reason a delivery was moved to the DLQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// All attempts were used up on retryable failures.
    RetriesExhausted,
    /// The subscriber rejected the request (4xx other than 429).
    ClientError,
    /// The subscription was found inactive or deleted mid-flight.
    SubscriptionInactive,
    /// The destination URL is malformed or the request could not be built.
    InvalidDestination,
}

impl FailureReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetriesExhausted => "retries_exhausted",
            Self::ClientError => "client_error",
            Self::SubscriptionInactive => "subscription_inactive",
            Self::InvalidDestination => "invalid_destination",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "retries_exhausted" => Some(Self::RetriesExhausted),
            "client_error" => Some(Self::ClientError),
            "subscription_inactive" => Some(Self::SubscriptionInactive),
            "invalid_destination" => Some(Self::InvalidDestination),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single delivery attempt.
///
/// Produced by the executor, consumed by the coordinator. The executor never
/// mutates state based on this — routing is entirely the coordinator's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// 2xx response.
    Success { status: u16 },
    /// A failure worth retrying with backoff.
    Retryable {
        kind: RetryableKind,
        status: Option<u16>,
        /// Server-provided retry hint in seconds (from Retry-After on 429).
        retry_after: Option<u64>,
        error: String,
    },
    /// A failure that will never succeed by repetition.
    Terminal {
        reason: FailureReason,
        status: Option<u16>,
        error: String,
    },
}

impl AttemptOutcome {
    /// Label used for the attempt metrics counter.
    #[must_use]
    pub fn class(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Retryable { .. } => "retryable",
            Self::Terminal { .. } => "terminal",
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Whether this outcome was an HTTP 429.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Self::Retryable {
                kind: RetryableKind::RateLimited,
                ..
            }
        )
    }
}

/// Classify an HTTP response status into an outcome.
///
/// - 2xx → success
/// - 429 → retryable (rate limited, carrying any Retry-After hint)
/// - other 4xx → terminal client error
/// - everything else (5xx, 1xx, 3xx after redirects are disabled) → retryable
pub fn classify_status(status: u16, retry_after: Option<u64>) -> AttemptOutcome {
    match status {
        200..=299 => AttemptOutcome::Success { status },
        429 => AttemptOutcome::Retryable {
            kind: RetryableKind::RateLimited,
            status: Some(status),
            retry_after,
            error: "HTTP 429".to_string(),
        },
        400..=499 => AttemptOutcome::Terminal {
            reason: FailureReason::ClientError,
            status: Some(status),
            error: format!("HTTP {status}"),
        },
        _ => AttemptOutcome::Retryable {
            kind: RetryableKind::ServerError,
            status: Some(status),
            retry_after: None,
            error: format!("HTTP {status}"),
        },
    }
}

/// Classify a transport-level failure into an outcome.
///
/// Timeouts and connection errors are always retryable; a request that could
/// not even be constructed (malformed URL) is terminal.
pub fn classify_transport_error(is_timeout: bool, is_builder: bool, error: String) -> AttemptOutcome {
    if is_builder {
        return AttemptOutcome::Terminal {
            reason: FailureReason::InvalidDestination,
            status: None,
            error,
        };
    }
    AttemptOutcome::Retryable {
        kind: if is_timeout {
            RetryableKind::Timeout
        } else {
            RetryableKind::Network
        },
        status: None,
        retry_after: None,
        error,
    }
}
