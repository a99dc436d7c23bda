//! HTTP handlers for the dead letter queue operator API.
//!
//! Authentication and authorization are handled by middleware outside this
//! crate; handlers only implement the DLQ contract.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ApiResult, WebhookError};
use crate::models::DlqFilter;
use crate::outcome::FailureReason;
use crate::router::WebhooksState;
use crate::services::dlq_service::{
    BulkReplayRequest, BulkReplaySummary, DlqEntryDetail, DlqEntryList, ReplayResponse,
};

/// Query parameters for listing DLQ entries.
#[derive(Debug, Clone, Deserialize)]
pub struct ListDlqQuery {
    pub subscription_id: Option<Uuid>,
    pub event_type: Option<String>,
    pub reason: Option<FailureReason>,
    pub from: Option<chrono::DateTime<chrono::Utc>>,
    pub to: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub include_replayed: bool,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

// ---------------------------------------------------------------------------
// List and detail handlers
// ---------------------------------------------------------------------------

/// List dead letter queue entries.
#[utoipa::path(
    get,
    path = "/webhooks/dlq",
    tag = "Dead Letter Queue",
    params(
        ("subscription_id" = Option<Uuid>, Query, description = "Filter by subscription"),
        ("event_type" = Option<String>, Query, description = "Filter by event type"),
        ("reason" = Option<String>, Query, description = "Filter by failure reason"),
        ("from" = Option<String>, Query, description = "Filter entries created after this time"),
        ("to" = Option<String>, Query, description = "Filter entries created before this time"),
        ("include_replayed" = Option<bool>, Query, description = "Include replayed entries"),
        ("limit" = Option<i64>, Query, description = "Max entries to return (default 50, max 100)"),
        ("offset" = Option<i64>, Query, description = "Offset for pagination"),
    ),
    responses(
        (status = 200, description = "List of DLQ entries", body = DlqEntryList),
    )
)]
pub async fn list_dlq_entries_handler(
    State(state): State<WebhooksState>,
    Query(query): Query<ListDlqQuery>,
) -> ApiResult<Json<DlqEntryList>> {
    let filter = DlqFilter {
        subscription_id: query.subscription_id,
        event_type: query.event_type,
        reason: query.reason,
        from: query.from,
        to: query.to,
        include_replayed: query.include_replayed,
    };

    let result = state
        .dlq_service
        .list_entries(filter, query.limit, query.offset)
        .await?;

    Ok(Json(result))
}

/// Get details of a DLQ entry.
#[utoipa::path(
    get,
    path = "/webhooks/dlq/{id}",
    tag = "Dead Letter Queue",
    params(
        ("id" = Uuid, Path, description = "DLQ entry ID")
    ),
    responses(
        (status = 200, description = "DLQ entry details", body = DlqEntryDetail),
        (status = 404, description = "Entry not found"),
    )
)]
pub async fn get_dlq_entry_handler(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DlqEntryDetail>> {
    let detail = state.dlq_service.get_entry_detail(id).await?;
    Ok(Json(detail))
}

/// Permanently discard a DLQ entry.
#[utoipa::path(
    delete,
    path = "/webhooks/dlq/{id}",
    tag = "Dead Letter Queue",
    params(
        ("id" = Uuid, Path, description = "DLQ entry ID")
    ),
    responses(
        (status = 204, description = "Entry deleted"),
        (status = 404, description = "Entry not found"),
    )
)]
pub async fn delete_dlq_entry_handler(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let deleted = state.dlq_service.delete_entry(id).await?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(WebhookError::DlqEntryNotFound)
    }
}

// ---------------------------------------------------------------------------
// Replay handlers
// ---------------------------------------------------------------------------

/// Replay a single DLQ entry.
#[utoipa::path(
    post,
    path = "/webhooks/dlq/{id}/replay",
    tag = "Dead Letter Queue",
    params(
        ("id" = Uuid, Path, description = "DLQ entry ID")
    ),
    responses(
        (status = 200, description = "Replay result", body = ReplayResponse),
        (status = 404, description = "Entry not found"),
        (status = 409, description = "Subscription is inactive"),
    )
)]
pub async fn replay_single_handler(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ReplayResponse>> {
    let response = state.dlq_service.replay_single(id).await?;
    Ok(Json(response))
}

/// Start a bulk replay job.
#[utoipa::path(
    post,
    path = "/webhooks/dlq/bulk-replay",
    tag = "Dead Letter Queue",
    request_body = BulkReplayRequest,
    responses(
        (status = 202, description = "Job started", body = BulkReplaySummary),
        (status = 400, description = "Invalid filter or rate"),
    )
)]
pub async fn bulk_replay_handler(
    State(state): State<WebhooksState>,
    Json(request): Json<BulkReplayRequest>,
) -> ApiResult<(StatusCode, Json<BulkReplaySummary>)> {
    let summary = state.dlq_service.clone().bulk_replay(request).await?;
    Ok((StatusCode::ACCEPTED, Json(summary)))
}

/// Get the status of a bulk replay job.
#[utoipa::path(
    get,
    path = "/webhooks/dlq/bulk-replay/{job_id}",
    tag = "Dead Letter Queue",
    params(
        ("job_id" = Uuid, Path, description = "Bulk replay job ID")
    ),
    responses(
        (status = 200, description = "Job status", body = BulkReplaySummary),
        (status = 404, description = "Job not found"),
    )
)]
pub async fn bulk_replay_status_handler(
    State(state): State<WebhooksState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<BulkReplaySummary>> {
    let summary = state.dlq_service.job_status(job_id).await?;
    Ok(Json(summary))
}

/// Abort a running bulk replay job.
#[utoipa::path(
    post,
    path = "/webhooks/dlq/bulk-replay/{job_id}/abort",
    tag = "Dead Letter Queue",
    params(
        ("job_id" = Uuid, Path, description = "Bulk replay job ID")
    ),
    responses(
        (status = 200, description = "Abort requested", body = BulkReplaySummary),
        (status = 404, description = "Job not found"),
    )
)]
pub async fn bulk_replay_abort_handler(
    State(state): State<WebhooksState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<BulkReplaySummary>> {
    let summary = state.dlq_service.abort_job(job_id).await?;
    Ok(Json(summary))
}
