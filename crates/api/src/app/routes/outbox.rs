//! Operator routes over the outbox: statistics, listings, requeue, delete and sweep.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use devboard_core::OutboxRecordId;

use crate::app::dto::{CleanupQuery, CleanupResponse, OutboxRecordResponse, PageQuery, RecordPageResponse};
use crate::app::{errors, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/statistics", get(statistics))
        .route("/pending", get(pending))
        .route("/failed", get(failed))
        .route("/cleanup", post(cleanup))
        .route("/:id/retry", post(retry))
        .route("/:id", delete(remove))
}

fn parse_id(raw: &str) -> Result<OutboxRecordId, axum::response::Response> {
    raw.parse::<OutboxRecordId>()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "id must be a UUID"))
}

/// GET /outbox/statistics
pub async fn statistics(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.admin.statistics().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => errors::outbox_error_to_response(e),
    }
}

/// GET /outbox/pending - oldest first
pub async fn pending(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<PageQuery>,
) -> axum::response::Response {
    let page = query.to_page_request();
    match services.admin.pending(page).await {
        Ok(records) => Json(RecordPageResponse::new(page, records)).into_response(),
        Err(e) => errors::outbox_error_to_response(e),
    }
}

/// GET /outbox/failed - most recently abandoned first
pub async fn failed(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<PageQuery>,
) -> axum::response::Response {
    let page = query.to_page_request();
    match services.admin.failed(page).await {
        Ok(records) => Json(RecordPageResponse::new(page, records)).into_response(),
        Err(e) => errors::outbox_error_to_response(e),
    }
}

/// POST /outbox/:id/retry
pub async fn retry(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.admin.retry(id).await {
        Ok(record) => Json(OutboxRecordResponse::from(record)).into_response(),
        Err(e) => errors::outbox_error_to_response(e),
    }
}

/// DELETE /outbox/:id
pub async fn remove(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.admin.delete(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::outbox_error_to_response(e),
    }
}

/// POST /outbox/cleanup?days=7
pub async fn cleanup(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<CleanupQuery>,
) -> axum::response::Response {
    match services.admin.cleanup(query.days).await {
        Ok(deleted_count) => Json(CleanupResponse { deleted_count }).into_response(),
        Err(e) => errors::outbox_error_to_response(e),
    }
}
