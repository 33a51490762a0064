//! HTTP API: scheduler-facing cron endpoints, event ingress, function run
//! inspection.

pub mod app;
pub mod middleware;
