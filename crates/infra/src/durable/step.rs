use std::future::Future;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use sweep_core::{CollaboratorError, RunId};

use super::ledger::{LedgerError, StepLedger};
use super::retry::RetryPolicy;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StepError {
    /// The step gave up (attempts exhausted or a permanent error).
    #[error("step {step} failed after {attempts} attempt(s): {source}")]
    Failed {
        step: String,
        attempts: u32,
        source: CollaboratorError,
    },

    #[error("step {step} output could not be (de)serialized: {message}")]
    Serialization { step: String, message: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Function-level validation failure outside any step.
    #[error("{0}")]
    Invalid(String),
}

/// Handle a durable function uses to run its named steps.
///
/// Each `run` consults the ledger first; a step already completed for this
/// run id returns its stored output without executing the body again.
#[derive(Clone)]
pub struct StepContext {
    run_id: RunId,
    ledger: Arc<dyn StepLedger>,
    policy: RetryPolicy,
    max_step_duration: Duration,
}

impl StepContext {
    pub fn new(
        run_id: RunId,
        ledger: Arc<dyn StepLedger>,
        policy: RetryPolicy,
        max_step_duration: Duration,
    ) -> Self {
        Self {
            run_id,
            ledger,
            policy,
            max_step_duration,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Jitter seed for a step, stable across redeliveries of the same run.
    fn retry_seed(&self, name: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.run_id.hash(&mut hasher);
        name.hash(&mut hasher);
        hasher.finish()
    }

    pub async fn run<T, F, Fut>(&self, name: &str, mut body: F) -> Result<T, StepError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        if let Some(record) = self.ledger.load_step(self.run_id, name).await? {
            if let Some(output) = record.completed_output() {
                debug!(run_id = %self.run_id, step = name, "step replayed from ledger");
                return serde_json::from_value(output.clone()).map_err(|e| {
                    StepError::Serialization {
                        step: name.to_string(),
                        message: e.to_string(),
                    }
                });
            }
        }

        let seed = self.retry_seed(name);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match tokio::time::timeout(self.max_step_duration, body()).await {
                Ok(Ok(value)) => {
                    let output =
                        serde_json::to_value(&value).map_err(|e| StepError::Serialization {
                            step: name.to_string(),
                            message: e.to_string(),
                        })?;
                    self.ledger
                        .record_step_success(self.run_id, name, attempt, output)
                        .await?;
                    debug!(run_id = %self.run_id, step = name, attempt, "step completed");
                    return Ok(value);
                }
                Ok(Err(e)) => e,
                Err(_) => CollaboratorError::transient(format!(
                    "step timed out after {}s",
                    self.max_step_duration.as_secs()
                )),
            };

            let exhausted = !error.is_transient() || !self.policy.should_retry(attempt);
            self.ledger
                .record_attempt_failure(self.run_id, name, attempt, error.message(), exhausted)
                .await?;

            if exhausted {
                warn!(run_id = %self.run_id, step = name, attempt, error = %error, "step failed");
                return Err(StepError::Failed {
                    step: name.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.policy.delay_for_attempt(attempt, seed);
            warn!(
                run_id = %self.run_id,
                step = name,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                error = %error,
                "step attempt failed; retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("run_id", &self.run_id)
            .field("policy", &self.policy)
            .field("max_step_duration", &self.max_step_duration)
            .finish_non_exhaustive()
    }
}
