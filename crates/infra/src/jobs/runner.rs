//! Batch runner: Idle → Enumerating → Processing → Reporting → Done.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

use sweep_core::{
    BatchResult, CollaboratorError, Eligibility, IterationUnit, JobDefinition, OrchestrationError,
    TenantHandle, TenantOutcome,
};

use super::enumerator::TenantEnumerator;
use super::processor::TenantProcessor;

/// Runner configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Maximum tenants processed concurrently (1 = sequential)
    pub max_concurrency: usize,
    /// Error details kept per run (counts are never capped)
    pub max_error_details: usize,
    /// Wall-clock budget for the whole run, enumeration included
    pub time_budget: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            max_error_details: 50,
            time_budget: Some(Duration::from_secs(55)),
        }
    }
}

impl RunnerConfig {
    pub fn sequential() -> Self {
        Self {
            max_concurrency: 1,
            ..Default::default()
        }
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_time_budget(mut self, budget: Option<Duration>) -> Self {
        self.time_budget = budget;
        self
    }
}

/// Phases of one batch run (for logs).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Enumerating,
    Processing,
    Reporting,
    Done,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Enumerating => "enumerating",
            RunPhase::Processing => "processing",
            RunPhase::Reporting => "reporting",
            RunPhase::Done => "done",
        }
    }
}

/// Drives one job type across every eligible tenant.
///
/// Enumeration failure aborts the run; per-tenant failures are folded into the
/// `BatchResult`. Reporting is the caller's business (see `ResultReporter`).
#[derive(Clone)]
pub struct BatchRunner {
    definition: JobDefinition,
    enumerator: Arc<dyn TenantEnumerator>,
    processor: Arc<dyn TenantProcessor>,
    config: RunnerConfig,
}

impl BatchRunner {
    pub fn new(
        definition: JobDefinition,
        enumerator: Arc<dyn TenantEnumerator>,
        processor: Arc<dyn TenantProcessor>,
    ) -> Self {
        Self {
            definition,
            enumerator,
            processor,
            config: RunnerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn definition(&self) -> &JobDefinition {
        &self.definition
    }

    /// Run the job once.
    pub async fn run(&self) -> Result<BatchResult, OrchestrationError> {
        let started = Instant::now();
        let deadline = self.config.time_budget.map(|budget| started + budget);
        let job = self.definition.name;

        debug!(job = %job, phase = RunPhase::Enumerating.as_str(), "batch run started");
        let candidates = self.enumerator.enumerate(&self.definition).await?;
        let units = iteration_units(self.definition.iteration_unit, candidates);

        let mut result = BatchResult::new();
        let mut eligible = Vec::with_capacity(units.len());
        for tenant in units {
            match self.definition.eligibility(&tenant) {
                Eligibility::Eligible => eligible.push(tenant),
                Eligibility::Ineligible(reason) => {
                    debug!(job = %job, tenant = %tenant.tenant_id, reason, "tenant skipped");
                    result.record_skipped();
                }
            }
        }

        debug!(
            job = %job,
            phase = RunPhase::Processing.as_str(),
            eligible = eligible.len(),
            skipped = result.skipped,
            "processing tenants"
        );
        self.process_all(eligible, deadline, &mut result).await;

        result.finish(started.elapsed());
        debug!(job = %job, phase = RunPhase::Reporting.as_str(), "batch run complete");
        Ok(result)
    }

    async fn process_all(
        &self,
        tenants: Vec<TenantHandle>,
        deadline: Option<Instant>,
        result: &mut BatchResult,
    ) {
        let tenants: Vec<Arc<TenantHandle>> = tenants.into_iter().map(Arc::new).collect();
        let permits = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut in_flight = BTreeSet::new();

        for (index, tenant) in tenants.iter().enumerate() {
            let permits = permits.clone();
            let processor = self.processor.clone();
            let tenant = tenant.clone();
            in_flight.insert(index);
            tasks.spawn(async move {
                // The semaphore is never closed, so acquire only fails if it were.
                let _permit = permits.acquire_owned().await;
                (index, processor.process(&tenant).await)
            });
        }

        // Single writer: only this loop touches `result`.
        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tasks.abort_all();
                        result.cancelled = true;
                        warn!(
                            job = %self.definition.name,
                            not_completed = in_flight.len(),
                            "time budget exhausted; remaining tenants not counted"
                        );
                        break;
                    }
                },
                None => tasks.join_next().await,
            };

            match next {
                None => break,
                Some(Ok((index, outcome))) => {
                    in_flight.remove(&index);
                    self.record(&tenants[index], outcome, result);
                }
                Some(Err(join_error)) => {
                    // Identified below: a panicked task never reports its index.
                    warn!(job = %self.definition.name, error = %join_error, "tenant task aborted");
                }
            }
        }

        if !result.cancelled {
            for index in in_flight {
                self.record(
                    &tenants[index],
                    Err(CollaboratorError::permanent("tenant processor panicked")),
                    result,
                );
            }
        }
    }

    fn record(
        &self,
        tenant: &TenantHandle,
        outcome: Result<TenantOutcome, CollaboratorError>,
        result: &mut BatchResult,
    ) {
        match outcome {
            Ok(outcome) => result.record_success(outcome),
            Err(e) => {
                warn!(
                    job = %self.definition.name,
                    tenant = %tenant.tenant_id,
                    location = %tenant.location_id,
                    org = %tenant.org_id,
                    transient = e.is_transient(),
                    error = %e,
                    "tenant processing failed"
                );
                result.record_failure(tenant.tenant_id, e.message(), self.config.max_error_details);
            }
        }
    }
}

/// Collapse enumerated handles into the job's iteration unit.
///
/// Organization-scoped jobs get one unit per org, represented by its first
/// non-archived handle (first handle if all are archived). Its capabilities
/// are the union over the org's locations.
fn iteration_units(unit: IterationUnit, candidates: Vec<TenantHandle>) -> Vec<TenantHandle> {
    match unit {
        IterationUnit::Location => candidates,
        IterationUnit::Organization => {
            let mut order = Vec::new();
            let mut by_org: HashMap<_, TenantHandle> = HashMap::new();
            for tenant in candidates {
                match by_org.get_mut(&tenant.org_id) {
                    Some(existing) => {
                        existing.capabilities.extend(tenant.capabilities.iter().copied());
                        if existing.archived && !tenant.archived {
                            let capabilities = std::mem::take(&mut existing.capabilities);
                            *existing = TenantHandle {
                                capabilities,
                                ..tenant
                            };
                        }
                    }
                    None => {
                        order.push(tenant.org_id);
                        by_org.insert(tenant.org_id, tenant);
                    }
                }
            }
            order
                .into_iter()
                .filter_map(|org| by_org.remove(&org))
                .collect()
        }
    }
}
