//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, collaborators, cron service, durable executor
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `errors.rs`: consistent `{error}` responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs` and the
/// black-box tests).
pub fn build_app(services: AppServices) -> Router {
    let auth_state = middleware::SchedulerAuthState {
        secret: services.scheduler_secret.clone(),
    };
    let services = Arc::new(services);

    // Everything except /health requires the scheduler secret.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::scheduler_auth,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}
