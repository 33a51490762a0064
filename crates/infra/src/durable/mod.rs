//! Durable, event-triggered functions.
//!
//! A function is a sequence of named steps. Each step's output is written to
//! a `StepLedger` keyed by `(run_id, step_name)`; the run id is the triggering
//! event's id, so redelivering an event replays the function and skips every
//! step that already completed. Failing steps are retried in place according to
//! the function's `RetryPolicy`, and a step that exhausts its attempts fails
//! the run (visible in the ledger and the logs).

pub mod executor;
pub mod ledger;
pub mod retry;
pub mod step;
pub mod worker;

pub use executor::{DispatchOutcome, DurableFunction, DurableStepExecutor, RunView};
pub use ledger::{
    InMemoryStepLedger, LedgerError, RunRecord, RunStatus, StepLedger, StepRecord, StepStatus,
};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use step::{StepContext, StepError};
pub use worker::{EventWorker, WorkerHandle};
