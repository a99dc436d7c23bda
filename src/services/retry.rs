//! Retry backoff computation.
//!
//! `delay = base * 2^(attempt-1)`, capped at the maximum delay, with
//! symmetric random jitter so a burst of failures across many
//! subscriptions does not retry in lockstep.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::config::RetryConfig;

/// Computes retry schedules for failed delivery attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Deterministic backoff for the given attempt number (1-based, the
    /// attempt that just failed), before jitter.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_secs_f64();
        let max = self.config.max_delay.as_secs_f64();
        let exponent = attempt.saturating_sub(1).min(63);
        let delay = base * 2_f64.powi(exponent as i32);
        Duration::from_secs_f64(delay.min(max))
    }

    /// Backoff with symmetric jitter applied, still capped at the maximum.
    #[must_use]
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if self.config.jitter_factor == 0.0 {
            return delay;
        }
        let delay_secs = delay.as_secs_f64();
        let spread = delay_secs * self.config.jitter_factor;
        let jitter = rand::thread_rng().gen_range(-spread..=spread);
        let jittered = (delay_secs + jitter)
            .max(0.0)
            .min(self.config.max_delay.as_secs_f64());
        Duration::from_secs_f64(jittered)
    }

    /// Absolute next-attempt time for a retryable failure.
    ///
    /// A server-provided retry hint (Retry-After on 429) replaces the
    /// computed backoff when it is larger, capped at the policy maximum.
    #[must_use]
    pub fn next_attempt_at(&self, attempt: u32, retry_after_secs: Option<u64>) -> DateTime<Utc> {
        let computed = self.delay_with_jitter(attempt);
        let delay = match retry_after_secs {
            Some(hint) => {
                let hinted = Duration::from_secs(hint).min(self.config.max_delay);
                hinted.max(computed)
            }
            None => computed,
        };
        Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| {
                chrono::Duration::from_std(self.config.max_delay)
                    .expect("max_delay fits in chrono::Duration")
            })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
