//! Axum router for the operator API.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::dlq;
use crate::services::dlq_service::DlqService;

/// Shared state for operator API handlers.
#[derive(Clone)]
pub struct WebhooksState {
    pub dlq_service: Arc<DlqService>,
}

impl WebhooksState {
    #[must_use]
    pub fn new(dlq_service: Arc<DlqService>) -> Self {
        Self { dlq_service }
    }
}

/// Creates the operator API router with all DLQ routes.
pub fn webhooks_router(state: WebhooksState) -> Router {
    Router::new()
        .route(
            "/webhooks/dlq",
            get(dlq::list_dlq_entries_handler),
        )
        .route(
            "/webhooks/dlq/bulk-replay",
            post(dlq::bulk_replay_handler),
        )
        .route(
            "/webhooks/dlq/bulk-replay/:job_id",
            get(dlq::bulk_replay_status_handler),
        )
        .route(
            "/webhooks/dlq/bulk-replay/:job_id/abort",
            post(dlq::bulk_replay_abort_handler),
        )
        .route(
            "/webhooks/dlq/:id",
            get(dlq::get_dlq_entry_handler).delete(dlq::delete_dlq_entry_handler),
        )
        .route(
            "/webhooks/dlq/:id/replay",
            post(dlq::replay_single_handler),
        )
        .with_state(state)
}
