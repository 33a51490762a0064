use axum::Router;

pub mod cron;
pub mod events;
pub mod functions;
pub mod system;

/// Router for all scheduler-authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/cron", cron::router())
        .nest("/events", events::router())
        .nest("/functions", functions::router())
}
