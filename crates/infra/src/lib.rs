//! Infrastructure layer: batch runner, durable functions, stores, config,
//! external services.

pub mod collaborators;
pub mod config;
pub mod durable;
pub mod functions;
pub mod jobs;
pub mod postgres;
