use axum::{
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use sweep_auth::{AuthFailure, SchedulerSecret};

use crate::app::errors;

#[derive(Debug, Clone)]
pub struct SchedulerAuthState {
    pub secret: Option<SchedulerSecret>,
}

/// Rejects any request whose `Authorization` header is not exactly
/// `Bearer <CRON_SECRET>`. Runs before any handler, so a rejected request
/// never reaches tenant enumeration.
pub async fn scheduler_auth(
    State(state): State<SchedulerAuthState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let header = authorization_header(req.headers());
    let expected = state.secret.as_ref().map(SchedulerSecret::expose);

    match sweep_auth::check(header, expected) {
        Ok(()) => next.run(req).await,
        Err(failure) => {
            match failure {
                AuthFailure::SecretUnset => {
                    warn!(path = %req.uri().path(), "rejecting request: CRON_SECRET is not configured")
                }
                other => warn!(path = %req.uri().path(), reason = %other, "rejecting request"),
            }
            errors::unauthorized()
        }
    }
}

/// A header that is present but not valid UTF-8 is treated as a mismatch.
fn authorization_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .map(|v| v.to_str().unwrap_or(""))
}
