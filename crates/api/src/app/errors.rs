use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use sweep_infra::durable::LedgerError;

/// `{ "error": message }` with the given status.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, axum::Json(json!({ "error": message.into() }))).into_response()
}

pub fn unauthorized() -> Response {
    json_error(StatusCode::UNAUTHORIZED, "Unauthorized")
}

pub fn ledger_error_to_response(err: LedgerError) -> Response {
    match err {
        LedgerError::Storage(msg) => json_error(StatusCode::SERVICE_UNAVAILABLE, msg),
        LedgerError::Corrupt(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, msg),
    }
}
