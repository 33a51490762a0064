//! Read-only view of durable function runs, for operators chasing a failed run.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use sweep_core::RunId;

use crate::app::{errors, services::AppServices};

pub fn router() -> Router {
    Router::new().route("/runs/:run_id", get(get_run))
}

/// GET /functions/runs/:run_id
///
/// The run record with its step records. The run id is the triggering
/// event's id.
pub async fn get_run(
    Extension(services): Extension<Arc<AppServices>>,
    Path(run_id): Path<String>,
) -> Response {
    let Ok(run_id) = run_id.parse::<RunId>() else {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid run id");
    };

    match services.executor.run_view(run_id).await {
        Ok(Some(view)) => (StatusCode::OK, Json(view)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, format!("run not found: {run_id}")),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
