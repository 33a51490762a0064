//! Dispatches events to durable functions and records run status.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{error, info};

use sweep_core::RunId;
use sweep_events::EventEnvelope;

use crate::jobs::RunGuard;

use super::ledger::{LedgerError, RunRecord, RunStatus, StepLedger, StepRecord};
use super::retry::RetryPolicy;
use super::step::{StepContext, StepError};

/// An event-triggered function made of named, memoized steps.
///
/// `run` may be invoked several times for the same event; everything with a
/// side effect belongs inside `ctx.run(..)`.
#[async_trait]
pub trait DurableFunction: Send + Sync {
    fn name(&self) -> &'static str;

    /// Event that triggers this function.
    fn event_name(&self) -> &'static str;

    fn max_step_duration(&self) -> Duration {
        Duration::from_secs(60)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    async fn run(&self, ctx: &StepContext, event: &EventEnvelope) -> Result<JsonValue, StepError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Completed(JsonValue),
    Failed(String),
    /// A run with the same id is executing in this process.
    AlreadyRunning,
    /// No function listens for this event name.
    Unhandled,
}

/// Run record plus its steps, as served to operators.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RunView {
    #[serde(flatten)]
    pub run: RunRecord,
    pub steps: Vec<StepRecord>,
}

#[derive(Clone)]
pub struct DurableStepExecutor {
    functions: HashMap<&'static str, Arc<dyn DurableFunction>>,
    ledger: Arc<dyn StepLedger>,
    active: RunGuard<RunId>,
}

impl DurableStepExecutor {
    pub fn new(ledger: Arc<dyn StepLedger>) -> Self {
        Self {
            functions: HashMap::new(),
            ledger,
            active: RunGuard::new(),
        }
    }

    /// One function per event name; a later registration replaces the earlier.
    pub fn register(&mut self, function: Arc<dyn DurableFunction>) {
        self.functions.insert(function.event_name(), function);
    }

    pub fn with(mut self, function: Arc<dyn DurableFunction>) -> Self {
        self.register(function);
        self
    }

    pub fn handles(&self, event_name: &str) -> bool {
        self.functions.contains_key(event_name)
    }

    pub fn event_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.functions.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn ledger(&self) -> Arc<dyn StepLedger> {
        self.ledger.clone()
    }

    /// Run id for an event; stable across redeliveries.
    pub fn run_id_for(event: &EventEnvelope) -> RunId {
        RunId::from_uuid(event.event_id())
    }

    pub async fn dispatch(&self, event: &EventEnvelope) -> Result<DispatchOutcome, LedgerError> {
        let Some(function) = self.functions.get(event.name()).cloned() else {
            return Ok(DispatchOutcome::Unhandled);
        };

        let run_id = Self::run_id_for(event);
        let Some(_lease) = self.active.try_acquire(run_id) else {
            info!(run_id = %run_id, function = function.name(), "run already executing; delivery ignored");
            return Ok(DispatchOutcome::AlreadyRunning);
        };

        let record = self
            .ledger
            .start_run(run_id, function.name(), event.name())
            .await?;
        let started = Instant::now();

        let ctx = StepContext::new(
            run_id,
            self.ledger.clone(),
            function.retry_policy(),
            function.max_step_duration(),
        );

        match function.run(&ctx, event).await {
            Ok(output) => {
                self.ledger
                    .finish_run(run_id, RunStatus::Completed, Some(output.clone()), None)
                    .await?;
                info!(
                    run_id = %run_id,
                    function = function.name(),
                    delivery = record.deliveries,
                    duration_ms = started.elapsed().as_millis() as u64,
                    output = %output,
                    "function run finished"
                );
                Ok(DispatchOutcome::Completed(output))
            }
            Err(StepError::Ledger(e)) => Err(e),
            Err(e) => {
                let message = e.to_string();
                self.ledger
                    .finish_run(run_id, RunStatus::Failed, None, Some(message.clone()))
                    .await?;
                error!(
                    run_id = %run_id,
                    function = function.name(),
                    delivery = record.deliveries,
                    duration_ms = started.elapsed().as_millis() as u64,
                    error = %message,
                    "function run failed"
                );
                Ok(DispatchOutcome::Failed(message))
            }
        }
    }

    pub async fn run_view(&self, run_id: RunId) -> Result<Option<RunView>, LedgerError> {
        let Some(run) = self.ledger.get_run(run_id).await? else {
            return Ok(None);
        };
        let steps = self.ledger.list_steps(run_id).await?;
        Ok(Some(RunView { run, steps }))
    }
}

impl std::fmt::Debug for DurableStepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStepExecutor")
            .field("events", &self.event_names())
            .finish_non_exhaustive()
    }
}
