//! Dead letter queue management.
//!
//! Deliveries land here after retry exhaustion or a terminal failure.
//! Operators can inspect entries, discard them, replay one, or start an
//! abortable rate-limited bulk replay job. Replay re-creates the delivery
//! cycle under the original delivery id so subscribers can deduplicate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::{BulkReplayConfig, DeliveryConfig};
use crate::error::WebhookError;
use crate::metrics::WebhookMetrics;
use crate::models::{Delivery, DeliveryStatus, DlqEntry, DlqFilter};
use crate::outcome::{AttemptOutcome, FailureReason};
use crate::services::coordinator::DeliveryCoordinator;
use crate::store::{dlq_entry_from_delivery, DeliveryStore, DlqStore, SubscriptionStore};
use crate::validation::validate_webhook_url;

/// Summary of a DLQ entry for list responses.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DlqEntrySummary {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub subscription_id: Uuid,
    pub subscription_url: String,
    pub event_id: Uuid,
    pub event_type: String,
    pub reason: FailureReason,
    pub last_response_code: Option<u16>,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub replayed_at: Option<DateTime<Utc>>,
}

impl From<DlqEntry> for DlqEntrySummary {
    fn from(e: DlqEntry) -> Self {
        Self {
            id: e.id,
            delivery_id: e.delivery_id,
            subscription_id: e.subscription_id,
            subscription_url: e.subscription_url,
            event_id: e.event_id,
            event_type: e.event_type,
            reason: e.reason,
            last_response_code: e.last_response_code,
            attempt_count: e.attempt_count,
            created_at: e.created_at,
            replayed_at: e.replayed_at,
        }
    }
}

/// Detailed view of a DLQ entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DlqEntryDetail {
    #[serde(flatten)]
    pub summary: DlqEntrySummary,
    pub payload: serde_json::Value,
    pub last_error: Option<String>,
    pub first_attempted_at: DateTime<Utc>,
}

/// Paginated list of DLQ entries.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DlqEntryList {
    pub entries: Vec<DlqEntrySummary>,
    pub total: usize,
    pub has_more: bool,
}

/// Response from a single replay.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReplayResponse {
    pub delivery_id: Uuid,
    pub status: String,
    pub message: String,
}

/// Request for bulk replay.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct BulkReplayRequest {
    /// Explicit entry ids; takes precedence over the filter fields.
    pub ids: Option<Vec<Uuid>>,
    pub subscription_id: Option<Uuid>,
    pub event_type: Option<String>,
    pub reason: Option<FailureReason>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Requested replays per second; clamped to the configured ceiling.
    pub rate_per_sec: Option<u32>,
    /// Unlock the emergency rate ceiling. Never the default; requires
    /// active operator monitoring.
    #[serde(default)]
    pub emergency: bool,
}

/// Snapshot of a bulk replay job.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BulkReplaySummary {
    pub job_id: Uuid,
    /// One of `running`, `completed`, `aborted`.
    pub state: String,
    pub rate_per_sec: u32,
    pub total_matched: usize,
    pub submitted: usize,
    pub delivered: usize,
    pub requeued: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// DLQ queue statistics.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DlqStats {
    pub total_entries: usize,
    pub unreplayed_entries: usize,
}

/// Internal state of a running bulk replay job.
struct BulkReplayJob {
    id: Uuid,
    rate_per_sec: u32,
    total_matched: usize,
    submitted: AtomicUsize,
    delivered: AtomicUsize,
    requeued: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    abort: AtomicBool,
    done: AtomicBool,
}

impl BulkReplayJob {
    fn new(rate_per_sec: u32, total_matched: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            rate_per_sec,
            total_matched,
            submitted: AtomicUsize::new(0),
            delivered: AtomicUsize::new(0),
            requeued: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            abort: AtomicBool::new(false),
            done: AtomicBool::new(false),
        }
    }

    fn snapshot(&self) -> BulkReplaySummary {
        let state = if !self.done.load(Ordering::Acquire) {
            "running"
        } else if self.abort.load(Ordering::Acquire) {
            "aborted"
        } else {
            "completed"
        };
        BulkReplaySummary {
            job_id: self.id,
            state: state.to_string(),
            rate_per_sec: self.rate_per_sec,
            total_matched: self.total_matched,
            submitted: self.submitted.load(Ordering::Acquire),
            delivered: self.delivered.load(Ordering::Acquire),
            requeued: self.requeued.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
            skipped: self.skipped.load(Ordering::Acquire),
        }
    }
}

/// Service for dead letter queue operations.
pub struct DlqService {
    dlq: Arc<dyn DlqStore>,
    deliveries: Arc<dyn DeliveryStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    metrics: Arc<WebhookMetrics>,
    delivery_config: DeliveryConfig,
    replay_config: BulkReplayConfig,
    /// Wired after construction; replay drives attempts through the
    /// coordinator when present, otherwise leaves deliveries for the worker.
    coordinator: OnceLock<Arc<DeliveryCoordinator>>,
    jobs: RwLock<HashMap<Uuid, Arc<BulkReplayJob>>>,
}

impl DlqService {
    #[must_use]
    pub fn new(
        dlq: Arc<dyn DlqStore>,
        deliveries: Arc<dyn DeliveryStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        metrics: Arc<WebhookMetrics>,
        delivery_config: DeliveryConfig,
        replay_config: BulkReplayConfig,
    ) -> Self {
        Self {
            dlq,
            deliveries,
            subscriptions,
            metrics,
            delivery_config,
            replay_config,
            coordinator: OnceLock::new(),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Wire the coordinator so replays can drive immediate attempts.
    pub fn set_coordinator(&self, coordinator: Arc<DeliveryCoordinator>) {
        let _ = self.coordinator.set(coordinator);
    }

    // -----------------------------------------------------------------------
    // Quarantine
    // -----------------------------------------------------------------------

    /// Move a failed delivery into the DLQ.
    pub async fn quarantine(
        &self,
        delivery: &Delivery,
        subscription_url: String,
        reason: FailureReason,
        attempt_count: u32,
        last_response_code: Option<u16>,
        last_error: Option<String>,
    ) -> Result<DlqEntry, WebhookError> {
        let entry = dlq_entry_from_delivery(
            delivery,
            subscription_url,
            reason,
            attempt_count,
            last_response_code,
            last_error,
        );
        self.dlq.insert(entry.clone()).await?;

        self.metrics.record_dlq_movement(reason.as_str());
        self.refresh_size_gauge().await;

        tracing::info!(
            target: "dlq",
            dlq_id = %entry.id,
            delivery_id = %delivery.id,
            subscription_id = %delivery.subscription_id,
            event_id = %delivery.event_id,
            event_type = %delivery.event_type,
            reason = reason.as_str(),
            "Delivery moved to dead letter queue"
        );

        Ok(entry)
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    /// List DLQ entries with filtering and pagination, newest first.
    pub async fn list_entries(
        &self,
        filter: DlqFilter,
        limit: usize,
        offset: usize,
    ) -> Result<DlqEntryList, WebhookError> {
        let limit = limit.clamp(1, 100);

        let entries = self.dlq.list(&filter, limit, offset).await?;
        let total = self.dlq.count(&filter).await?;
        let has_more = offset + limit < total;

        Ok(DlqEntryList {
            entries: entries.into_iter().map(DlqEntrySummary::from).collect(),
            total,
            has_more,
        })
    }

    /// Get detailed information about one entry.
    pub async fn get_entry_detail(&self, id: Uuid) -> Result<DlqEntryDetail, WebhookError> {
        let entry = self
            .dlq
            .get(id)
            .await?
            .ok_or(WebhookError::DlqEntryNotFound)?;

        Ok(DlqEntryDetail {
            payload: entry.payload.clone(),
            last_error: entry.last_error.clone(),
            first_attempted_at: entry.first_attempted_at,
            summary: DlqEntrySummary::from(entry),
        })
    }

    /// Permanently discard an entry.
    pub async fn delete_entry(&self, id: Uuid) -> Result<bool, WebhookError> {
        let deleted = self.dlq.delete(id).await?;
        if deleted {
            self.refresh_size_gauge().await;
            tracing::info!(target: "dlq", dlq_id = %id, "DLQ entry deleted");
        }
        Ok(deleted)
    }

    /// Queue statistics for the metrics/stats surface.
    pub async fn stats(&self) -> Result<DlqStats, WebhookError> {
        let total_entries = self.dlq.size().await?;
        let unreplayed_entries = self.dlq.count(&DlqFilter::default()).await?;
        Ok(DlqStats {
            total_entries,
            unreplayed_entries,
        })
    }

    // -----------------------------------------------------------------------
    // Replay
    // -----------------------------------------------------------------------

    /// Replay a single DLQ entry.
    ///
    /// Validates the subscription is active and its URL still looks
    /// deliverable, then re-creates the delivery under the original
    /// delivery id with a fresh attempt cycle. Replaying an entry that was
    /// already replayed is an idempotent no-op reporting the prior result.
    pub async fn replay_single(&self, id: Uuid) -> Result<ReplayResponse, WebhookError> {
        let (response, _) = self.replay_inner(id).await?;
        Ok(response)
    }

    /// Replay one entry, also returning the immediate attempt outcome so the
    /// bulk runner can react to downstream rate limiting.
    async fn replay_inner(
        &self,
        id: Uuid,
    ) -> Result<(ReplayResponse, Option<AttemptOutcome>), WebhookError> {
        let entry = self
            .dlq
            .get(id)
            .await?
            .ok_or(WebhookError::DlqEntryNotFound)?;

        if entry.replayed_at.is_some() {
            let prior = match DeliveryStore::get(&*self.deliveries, entry.delivery_id).await? {
                Some(d) => d.status.as_str().to_string(),
                None => "delivered".to_string(),
            };
            return Ok((
                ReplayResponse {
                    delivery_id: entry.delivery_id,
                    status: "already_replayed".to_string(),
                    message: format!("Entry was already replayed; delivery is {prior}"),
                },
                None,
            ));
        }

        let subscription = self
            .subscriptions
            .get(entry.subscription_id)
            .await?
            .ok_or(WebhookError::SubscriptionNotFound)?;

        if !subscription.active {
            return Err(WebhookError::SubscriptionInactive);
        }
        validate_webhook_url(&subscription.url, self.delivery_config.allow_http)?;

        // New attempt cycle under the original delivery id.
        let now = Utc::now();
        let delivery = Delivery {
            id: entry.delivery_id,
            subscription_id: entry.subscription_id,
            event_id: entry.event_id,
            event_type: entry.event_type.clone(),
            payload: entry.payload.clone(),
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            max_attempts: self.delivery_config.max_attempts,
            next_attempt_at: Some(now),
            claimed_until: None,
            is_replay: true,
            last_error: None,
            response_code: None,
            response_body: None,
            created_at: now,
            updated_at: now,
            delivered_at: None,
        };
        let delivery_id = delivery.id;

        self.deliveries.insert(delivery).await?;
        self.dlq.mark_replayed(id, now).await?;

        tracing::info!(
            target: "dlq",
            dlq_id = %id,
            delivery_id = %delivery_id,
            subscription_id = %entry.subscription_id,
            "DLQ entry replayed"
        );

        let outcome = match self.coordinator.get() {
            Some(coordinator) => coordinator.process_delivery(delivery_id).await?,
            None => None,
        };

        let (status, message) = match &outcome {
            Some(AttemptOutcome::Success { .. }) => {
                self.dlq.delete(id).await?;
                self.refresh_size_gauge().await;
                ("delivered".to_string(), "Replay delivered".to_string())
            }
            Some(AttemptOutcome::Retryable { .. }) => (
                "retrying".to_string(),
                "Replay failed, re-queued with backoff".to_string(),
            ),
            Some(AttemptOutcome::Terminal { reason, .. }) => (
                "dead_lettered".to_string(),
                format!("Replay failed terminally: {reason}"),
            ),
            None => (
                "pending".to_string(),
                "Replay queued for delivery".to_string(),
            ),
        };

        Ok((
            ReplayResponse {
                delivery_id,
                status,
                message,
            },
            outcome,
        ))
    }

    /// Start an asynchronous bulk replay job. Returns an initial snapshot;
    /// poll `job_status` for progress.
    pub async fn bulk_replay(
        self: Arc<Self>,
        request: BulkReplayRequest,
    ) -> Result<BulkReplaySummary, WebhookError> {
        let rate = self.effective_rate(&request)?;
        let entries = self.matching_entries(&request).await?;

        let job = Arc::new(BulkReplayJob::new(rate, entries.len()));
        {
            let mut jobs = self.jobs.write().await;
            jobs.insert(job.id, job.clone());
        }

        tracing::info!(
            target: "dlq",
            job_id = %job.id,
            matched = entries.len(),
            rate_per_sec = rate,
            emergency = request.emergency,
            "Starting bulk replay job"
        );

        let service = self.clone();
        let runner = job.clone();
        tokio::spawn(async move {
            service.run_bulk_replay(runner, entries).await;
        });

        Ok(job.snapshot())
    }

    /// Snapshot of a bulk replay job.
    pub async fn job_status(&self, job_id: Uuid) -> Result<BulkReplaySummary, WebhookError> {
        let jobs = self.jobs.read().await;
        jobs.get(&job_id)
            .map(|j| j.snapshot())
            .ok_or(WebhookError::ReplayJobNotFound)
    }

    /// Abort a running bulk replay job: no further items are submitted,
    /// in-flight items complete normally.
    pub async fn abort_job(&self, job_id: Uuid) -> Result<BulkReplaySummary, WebhookError> {
        let jobs = self.jobs.read().await;
        let job = jobs.get(&job_id).ok_or(WebhookError::ReplayJobNotFound)?;
        job.abort.store(true, Ordering::Release);
        tracing::info!(target: "dlq", job_id = %job_id, "Bulk replay job abort requested");
        Ok(job.snapshot())
    }

    // -----------------------------------------------------------------------
    // Bulk replay internals
    // -----------------------------------------------------------------------

    fn effective_rate(&self, request: &BulkReplayRequest) -> Result<u32, WebhookError> {
        let ceiling = if request.emergency {
            self.replay_config.emergency_max_per_sec
        } else {
            self.replay_config.normal_max_per_sec
        };
        let requested = request
            .rate_per_sec
            .unwrap_or(self.replay_config.normal_max_per_sec);
        if requested == 0 {
            return Err(WebhookError::Validation(
                "rate_per_sec must be > 0".to_string(),
            ));
        }
        if requested > ceiling {
            tracing::warn!(
                target: "dlq",
                requested,
                ceiling,
                emergency = request.emergency,
                "Requested bulk replay rate above ceiling, clamping"
            );
        }
        Ok(requested.min(ceiling))
    }

    async fn matching_entries(
        &self,
        request: &BulkReplayRequest,
    ) -> Result<Vec<Uuid>, WebhookError> {
        if let Some(ref ids) = request.ids {
            if ids.len() > 1000 {
                return Err(WebhookError::Validation(
                    "Maximum 1000 ids per bulk replay".to_string(),
                ));
            }
            return Ok(ids.clone());
        }

        let filter = DlqFilter {
            subscription_id: request.subscription_id,
            event_type: request.event_type.clone(),
            reason: request.reason,
            from: request.from,
            to: request.to,
            include_replayed: false,
        };

        let mut ids = Vec::new();
        let mut offset = 0;
        loop {
            let batch = self.dlq.list(&filter, 100, offset).await?;
            if batch.is_empty() {
                break;
            }
            offset += batch.len();
            ids.extend(batch.into_iter().map(|e| e.id));
        }
        Ok(ids)
    }

    async fn run_bulk_replay(&self, job: Arc<BulkReplayJob>, entries: Vec<Uuid>) {
        let pace = Duration::from_secs_f64(1.0 / f64::from(job.rate_per_sec));
        let mut ticker = tokio::time::interval(pace);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut backoff = self.replay_config.rate_limit_backoff;
        let mut throttled = false;

        for entry_id in entries {
            if job.abort.load(Ordering::Acquire) {
                break;
            }
            ticker.tick().await;

            if throttled {
                // Downstream said 429 on the previous replay; slow the whole
                // job down before submitting more.
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(self.replay_config.max_rate_limit_backoff);
            }

            job.submitted.fetch_add(1, Ordering::AcqRel);
            match self.replay_inner(entry_id).await {
                Ok((response, outcome)) => {
                    throttled = outcome.as_ref().is_some_and(AttemptOutcome::is_rate_limited);
                    if !throttled {
                        backoff = self.replay_config.rate_limit_backoff;
                    }
                    match response.status.as_str() {
                        "delivered" => {
                            job.delivered.fetch_add(1, Ordering::AcqRel);
                        }
                        "retrying" | "pending" => {
                            job.requeued.fetch_add(1, Ordering::AcqRel);
                        }
                        "already_replayed" => {
                            job.skipped.fetch_add(1, Ordering::AcqRel);
                        }
                        _ => {
                            job.failed.fetch_add(1, Ordering::AcqRel);
                        }
                    }
                }
                Err(
                    WebhookError::DlqEntryNotFound
                    | WebhookError::SubscriptionNotFound
                    | WebhookError::SubscriptionInactive,
                ) => {
                    job.skipped.fetch_add(1, Ordering::AcqRel);
                }
                Err(e) => {
                    tracing::warn!(
                        target: "dlq",
                        job_id = %job.id,
                        dlq_id = %entry_id,
                        error = %e,
                        "Bulk replay item failed"
                    );
                    job.failed.fetch_add(1, Ordering::AcqRel);
                }
            }
        }

        job.done.store(true, Ordering::Release);
        let summary = job.snapshot();
        tracing::info!(
            target: "dlq",
            job_id = %job.id,
            state = %summary.state,
            submitted = summary.submitted,
            delivered = summary.delivered,
            requeued = summary.requeued,
            failed = summary.failed,
            skipped = summary.skipped,
            "Bulk replay job finished"
        );
    }

    async fn refresh_size_gauge(&self) {
        if let Ok(size) = self.dlq.size().await {
            self.metrics.dlq_size.set(size as i64);
        }
    }
}
