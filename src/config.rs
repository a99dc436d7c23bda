//! Configuration for the delivery engine.
//!
//! All components are configured programmatically by the embedding
//! application. Defaults match production behavior; `for_testing` variants
//! shrink every interval so integration tests run in milliseconds.

use std::time::Duration;

/// Configuration for delivery attempt execution.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Hard timeout for a single delivery attempt.
    pub request_timeout: Duration,
    /// Maximum attempts per delivery (initial + retries).
    pub max_attempts: u32,
    /// User-Agent header sent with every delivery.
    pub user_agent: String,
    /// Cap on captured response body bytes.
    pub max_response_bytes: usize,
    /// Allow plain-HTTP destinations (dev/test only).
    pub allow_http: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_attempts: 5,
            user_agent: "clipline-webhooks/1.0".to_string(),
            max_response_bytes: 10 * 1024,
            allow_http: false,
        }
    }
}

impl DeliveryConfig {
    /// Set the maximum delivery attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Set the per-attempt request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Allow plain-HTTP destinations.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }
}

/// Configuration for retry backoff computation.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Base delay before the first retry.
    pub base_delay: Duration,
    /// Cap on any computed delay.
    pub max_delay: Duration,
    /// Symmetric jitter as a fraction of the delay (0.2 = ±20%).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
            jitter_factor: 0.2,
        }
    }
}

impl RetryConfig {
    /// Configuration with sub-second delays for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            jitter_factor: 0.2,
        }
    }

    /// Validate invariants between the fields.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay.is_zero() {
            return Err("base_delay must be > 0".to_string());
        }
        if self.max_delay < self.base_delay {
            return Err("max_delay must be >= base_delay".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err("jitter_factor must be in range [0.0, 1.0]".to_string());
        }
        Ok(())
    }
}

/// Configuration for per-subscription health tracking.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Consecutive failures before a subscription is flagged degraded.
    pub warn_threshold: u32,
    /// Consecutive failures before a subscription is auto-disabled.
    pub deactivate_threshold: u32,
    /// Retry-queue depth above which a backpressure signal is emitted.
    pub queue_high_water: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            warn_threshold: 10,
            deactivate_threshold: 20,
            queue_high_water: 1000,
        }
    }
}

/// Configuration for the delivery worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent delivery attempts.
    pub concurrency: usize,
    /// How often to poll for due deliveries (in milliseconds).
    pub poll_interval_ms: u64,
    /// Claim lease duration for dequeued deliveries (in seconds).
    pub claim_lease_secs: u64,
    /// How often to release stale claims (in seconds).
    pub stale_release_interval_secs: u64,
    /// How often to sample queue depth for backpressure signals (in seconds).
    pub depth_sample_interval_secs: u64,
    /// Maximum deliveries claimed per poll.
    pub batch_size: usize,
    /// Capacity of the published-event channel.
    pub event_channel_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            poll_interval_ms: 500,
            claim_lease_secs: 30,
            stale_release_interval_secs: 60,
            depth_sample_interval_secs: 5,
            batch_size: 32,
            event_channel_capacity: 1024,
        }
    }
}

impl WorkerConfig {
    /// Configuration with tight intervals for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            concurrency: 8,
            poll_interval_ms: 10,
            claim_lease_secs: 5,
            stale_release_interval_secs: 1,
            depth_sample_interval_secs: 1,
            batch_size: 32,
            event_channel_capacity: 256,
        }
    }
}

/// Configuration for bulk DLQ replay jobs.
///
/// The emergency ceiling is only reachable when a job explicitly opts in;
/// it is never the default.
#[derive(Debug, Clone)]
pub struct BulkReplayConfig {
    /// Ceiling on requests/sec for a normal bulk replay job.
    pub normal_max_per_sec: u32,
    /// Ceiling on requests/sec when the job sets the emergency flag.
    pub emergency_max_per_sec: u32,
    /// Base pacing backoff applied when downstream responds 429.
    pub rate_limit_backoff: Duration,
    /// Cap on the pacing backoff.
    pub max_rate_limit_backoff: Duration,
}

impl Default for BulkReplayConfig {
    fn default() -> Self {
        Self {
            normal_max_per_sec: 10,
            emergency_max_per_sec: 50,
            rate_limit_backoff: Duration::from_secs(1),
            max_rate_limit_backoff: Duration::from_secs(60),
        }
    }
}
