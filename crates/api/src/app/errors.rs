use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use devboard_outbox::OutboxError;

pub fn outbox_error_to_response(err: OutboxError) -> axum::response::Response {
    match err {
        OutboxError::NotFound(id) => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("outbox record {id} not found"),
        ),
        OutboxError::InvalidState(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_state", msg),
        OutboxError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        OutboxError::Serialization(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "serialization_error", msg)
        }
        OutboxError::Storage(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
