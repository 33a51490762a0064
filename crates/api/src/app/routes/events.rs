//! Event ingress for durable functions.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{error, info};
use uuid::Uuid;

use sweep_events::{EventBus, EventEnvelope};

use crate::app::{errors, services::AppServices};

#[derive(Debug, Deserialize)]
pub struct PublishEventRequest {
    pub name: String,
    #[serde(default)]
    pub payload: JsonValue,
    /// Caller-chosen id; resending the same id resumes the same function run.
    pub id: Option<Uuid>,
}

pub fn router() -> Router {
    Router::new().route("/", post(publish_event))
}

/// POST /events
///
/// Publishes to the internal bus and returns immediately; the event worker
/// runs the matching function in the background.
pub async fn publish_event(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<PublishEventRequest>,
) -> Response {
    if !services.executor.handles(&body.name) {
        return errors::json_error(
            StatusCode::NOT_FOUND,
            format!("no function handles event: {}", body.name),
        );
    }

    let envelope = match body.id {
        Some(id) => EventEnvelope::with_id(id, body.name, body.payload),
        None => EventEnvelope::new(body.name, body.payload),
    };
    let event_id = envelope.event_id();
    let event_name = envelope.name().to_string();

    if let Err(e) = services.bus.publish(envelope) {
        error!(event = %event_name, event_id = %event_id, error = %e, "event publish failed");
        return errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    info!(event = %event_name, event_id = %event_id, "event accepted");
    (
        StatusCode::ACCEPTED,
        Json(json!({ "accepted": true, "event_id": event_id })),
    )
        .into_response()
}
