//! `sweep-auth`: scheduler authentication boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage: it only knows
//! how to compare an `Authorization` header value against the shared secret.

pub mod scheduler;

pub use scheduler::{authorize, check, AuthFailure, SchedulerSecret};
