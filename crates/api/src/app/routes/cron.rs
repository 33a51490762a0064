//! Scheduler-facing batch job endpoints.
//!
//! The external scheduler calls `GET /cron/{job}` on each job's cron schedule.
//! Halted and overlapping invocations still answer 200 so the scheduler does
//! not retry them.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;

use sweep_core::JobName;
use sweep_infra::jobs::ReportStatus;

use crate::app::{errors, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_jobs))
        .route("/:job", get(run_job))
}

/// GET /cron
///
/// The job catalog plus each job's current kill-switch state.
pub async fn list_jobs(Extension(services): Extension<Arc<AppServices>>) -> Response {
    let switches = services.cron.kill_switches();
    let jobs = services
        .cron
        .catalog()
        .iter()
        .map(|def| {
            json!({
                "name": def.name,
                "schedule": def.schedule,
                "kill_switch": def.kill_switch_env_key,
                "iteration_unit": def.iteration_unit,
                "min_plan": def.min_plan,
                "required_capabilities": def.required_capabilities,
                "description": def.description,
                "halted": switches.is_halted(def.name),
            })
        })
        .collect::<Vec<_>>();

    Json(json!({ "jobs": jobs })).into_response()
}

/// GET /cron/:job
pub async fn run_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job): Path<String>,
) -> Response {
    let Ok(job) = job.parse::<JobName>() else {
        return errors::json_error(StatusCode::NOT_FOUND, format!("unknown job: {job}"));
    };

    let report = services.cron.invoke(job).await;
    let status = match report.status {
        ReportStatus::Ok => StatusCode::OK,
        ReportStatus::Failed => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(report.body)).into_response()
}
