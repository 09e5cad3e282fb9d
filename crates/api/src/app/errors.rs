use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{debug, error};

use microfin_infra::command_dispatcher::DispatchError;

/// Handler result: both arms are complete responses.
pub type ApiResult = Result<Response, Response>;

/// Render the error body every failure uses: `{"error": code, "message": text}`.
pub fn fail(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": code, "message": message.into() }))).into_response()
}

pub fn not_found(what: &str) -> Response {
    fail(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
}

pub fn invalid_id(what: &str) -> Response {
    fail(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id"))
}

pub fn validation(message: impl Into<String>) -> Response {
    fail(StatusCode::BAD_REQUEST, "validation_error", message)
}

pub fn dispatch_error_to_response(err: DispatchError) -> Response {
    debug!(error = %err, "command failed");
    match err {
        DispatchError::Concurrency(msg) => fail(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => fail(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::InvariantViolation(msg) => fail(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg),
        DispatchError::Unauthorized => fail(StatusCode::FORBIDDEN, "unauthorized", "unauthorized"),
        DispatchError::NotFound => fail(StatusCode::NOT_FOUND, "not_found", "not found"),
        DispatchError::TenantIsolation(msg) => fail(StatusCode::FORBIDDEN, "tenant_isolation", msg),
        DispatchError::Deserialize(msg) => {
            error!(error = %msg, "stored event could not be decoded");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => {
            error!(error = %e, "event store failure");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
        DispatchError::Publish(msg) => fail(StatusCode::BAD_GATEWAY, "publish_error", msg),
    }
}
