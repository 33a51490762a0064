//! Cron-triggered batch jobs: visit every eligible tenant once per invocation.
//!
//! ## Design
//!
//! - Tenant enumeration failure aborts the run (invocation-level failure)
//! - Per-tenant failures are isolated, counted, and never abort the loop
//! - `processed` counts attempts in the job's iteration unit
//! - Bounded parallelism with a single-writer result aggregator
//! - A time budget cancels the tail of the run instead of overrunning the platform
//!
//! ## Components
//!
//! - `TenantEnumerator`: yields the candidate tenants for a job
//! - `TenantProcessor`: the opaque per-tenant unit of work (domain collaborator)
//! - `BatchRunner`: drives enumeration + processing into a `BatchResult`
//! - `ResultReporter`: logs the run, forwards failures to the `ErrorTracker`
//! - `RunGuard`: rejects overlapping runs of the same key
//! - `CronService`: one invocation end to end (kill switch, guard, run, report)

pub mod enumerator;
pub mod guard;
pub mod processor;
pub mod reporter;
pub mod runner;
pub mod service;

pub use enumerator::{EnumerationError, InMemoryTenantDirectory, TenantEnumerator};
pub use guard::{RunGuard, RunLease};
pub use processor::{ProcessorRegistry, TenantProcessor};
pub use reporter::{
    CapturedException, ErrorTracker, InMemoryErrorTracker, ReportStatus, ResultReporter, RunReport,
    TracingErrorTracker,
};
pub use runner::{BatchRunner, RunPhase, RunnerConfig};
pub use service::CronService;
