//! Step ledger: the persisted memory of durable function runs.
//!
//! Records are keyed by `(run_id, step_name)`. A completed step's output is
//! the value replayed on every later delivery of the same event.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use sweep_core::RunId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger storage error: {0}")]
    Storage(String),
    #[error("corrupt ledger record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(LedgerError::Corrupt(format!("run status {other:?}"))),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Last attempt failed; another one is scheduled.
    Retrying,
    Completed,
    /// Attempts exhausted (or a permanent error).
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Retrying => "retrying",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }
}

impl FromStr for StepStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retrying" => Ok(StepStatus::Retrying),
            "completed" => Ok(StepStatus::Completed),
            "failed" => Ok(StepStatus::Failed),
            other => Err(LedgerError::Corrupt(format!("step status {other:?}"))),
        }
    }
}

/// One function run (one event delivery lineage).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub function: String,
    pub event_name: String,
    pub status: RunStatus,
    pub output: Option<JsonValue>,
    pub error: Option<String>,
    /// Number of times the event was dispatched for this run.
    pub deliveries: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// One named step of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub run_id: RunId,
    pub name: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub output: Option<JsonValue>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    /// Stored output of a completed step, if any.
    pub fn completed_output(&self) -> Option<&JsonValue> {
        match self.status {
            StepStatus::Completed => self.output.as_ref(),
            _ => None,
        }
    }
}

#[async_trait]
pub trait StepLedger: Send + Sync {
    /// Create the run record, or mark an existing one running again
    /// (redelivery). `started_at` of an existing run is preserved.
    async fn start_run(
        &self,
        run_id: RunId,
        function: &str,
        event_name: &str,
    ) -> Result<RunRecord, LedgerError>;

    async fn finish_run(
        &self,
        run_id: RunId,
        status: RunStatus,
        output: Option<JsonValue>,
        error: Option<String>,
    ) -> Result<(), LedgerError>;

    async fn get_run(&self, run_id: RunId) -> Result<Option<RunRecord>, LedgerError>;

    async fn load_step(&self, run_id: RunId, name: &str) -> Result<Option<StepRecord>, LedgerError>;

    /// Record a failed attempt. `exhausted` marks the step `failed`.
    async fn record_attempt_failure(
        &self,
        run_id: RunId,
        name: &str,
        attempt: u32,
        error: &str,
        exhausted: bool,
    ) -> Result<(), LedgerError>;

    async fn record_step_success(
        &self,
        run_id: RunId,
        name: &str,
        attempts: u32,
        output: JsonValue,
    ) -> Result<(), LedgerError>;

    /// Steps of a run, oldest first.
    async fn list_steps(&self, run_id: RunId) -> Result<Vec<StepRecord>, LedgerError>;
}

#[derive(Debug, Default)]
struct LedgerState {
    runs: HashMap<RunId, RunRecord>,
    steps: HashMap<RunId, Vec<StepRecord>>,
}

/// In-memory ledger for tests/dev. Survives redelivery, not restarts.
#[derive(Debug, Default)]
pub struct InMemoryStepLedger {
    state: RwLock<LedgerState>,
}

impl InMemoryStepLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, LedgerState>, LedgerError> {
        self.state
            .write()
            .map_err(|_| LedgerError::Storage("lock poisoned".to_string()))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, LedgerState>, LedgerError> {
        self.state
            .read()
            .map_err(|_| LedgerError::Storage("lock poisoned".to_string()))
    }
}

fn upsert_step<'a>(steps: &'a mut Vec<StepRecord>, run_id: RunId, name: &str) -> &'a mut StepRecord {
    let index = match steps.iter().position(|s| s.name == name) {
        Some(index) => index,
        None => {
            steps.push(StepRecord {
                run_id,
                name: name.to_string(),
                status: StepStatus::Retrying,
                attempts: 0,
                output: None,
                last_error: None,
                updated_at: Utc::now(),
                completed_at: None,
            });
            steps.len() - 1
        }
    };
    &mut steps[index]
}

#[async_trait]
impl StepLedger for InMemoryStepLedger {
    async fn start_run(
        &self,
        run_id: RunId,
        function: &str,
        event_name: &str,
    ) -> Result<RunRecord, LedgerError> {
        let mut state = self.write()?;
        let run = state.runs.entry(run_id).or_insert_with(|| RunRecord {
            run_id,
            function: function.to_string(),
            event_name: event_name.to_string(),
            status: RunStatus::Running,
            output: None,
            error: None,
            deliveries: 0,
            started_at: Utc::now(),
            finished_at: None,
        });
        run.status = RunStatus::Running;
        run.error = None;
        run.finished_at = None;
        run.deliveries += 1;
        Ok(run.clone())
    }

    async fn finish_run(
        &self,
        run_id: RunId,
        status: RunStatus,
        output: Option<JsonValue>,
        error: Option<String>,
    ) -> Result<(), LedgerError> {
        let mut state = self.write()?;
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| LedgerError::Storage(format!("run not started: {run_id}")))?;
        run.status = status;
        run.output = output;
        run.error = error;
        run.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn get_run(&self, run_id: RunId) -> Result<Option<RunRecord>, LedgerError> {
        Ok(self.read()?.runs.get(&run_id).cloned())
    }

    async fn load_step(&self, run_id: RunId, name: &str) -> Result<Option<StepRecord>, LedgerError> {
        Ok(self
            .read()?
            .steps
            .get(&run_id)
            .and_then(|steps| steps.iter().find(|s| s.name == name))
            .cloned())
    }

    async fn record_attempt_failure(
        &self,
        run_id: RunId,
        name: &str,
        attempt: u32,
        error: &str,
        exhausted: bool,
    ) -> Result<(), LedgerError> {
        let mut state = self.write()?;
        let step = upsert_step(state.steps.entry(run_id).or_default(), run_id, name);
        step.attempts = attempt;
        step.last_error = Some(error.to_string());
        step.status = if exhausted {
            StepStatus::Failed
        } else {
            StepStatus::Retrying
        };
        step.updated_at = Utc::now();
        Ok(())
    }

    async fn record_step_success(
        &self,
        run_id: RunId,
        name: &str,
        attempts: u32,
        output: JsonValue,
    ) -> Result<(), LedgerError> {
        let mut state = self.write()?;
        let step = upsert_step(state.steps.entry(run_id).or_default(), run_id, name);
        let now = Utc::now();
        step.attempts = attempts;
        step.status = StepStatus::Completed;
        step.output = Some(output);
        step.updated_at = now;
        step.completed_at = Some(now);
        Ok(())
    }

    async fn list_steps(&self, run_id: RunId) -> Result<Vec<StepRecord>, LedgerError> {
        Ok(self.read()?.steps.get(&run_id).cloned().unwrap_or_default())
    }
}
