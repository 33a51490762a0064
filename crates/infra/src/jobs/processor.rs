use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use sweep_core::{CollaboratorError, JobName, TenantHandle, TenantOutcome};

/// The per-tenant unit of work of one job type.
///
/// What happens inside is owned by the domain module; the orchestrator only
/// needs the outcome. Implementations must tolerate being called again for the
/// same tenant on the next scheduled run.
#[async_trait]
pub trait TenantProcessor: Send + Sync {
    async fn process(&self, tenant: &TenantHandle) -> Result<TenantOutcome, CollaboratorError>;
}

/// Processor lookup by job name.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<JobName, Arc<dyn TenantProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job: JobName, processor: Arc<dyn TenantProcessor>) {
        self.processors.insert(job, processor);
    }

    pub fn with(mut self, job: JobName, processor: Arc<dyn TenantProcessor>) -> Self {
        self.register(job, processor);
        self
    }

    pub fn get(&self, job: JobName) -> Option<Arc<dyn TenantProcessor>> {
        self.processors.get(&job).cloned()
    }

    pub fn jobs(&self) -> impl Iterator<Item = JobName> + '_ {
        self.processors.keys().copied()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut jobs: Vec<_> = self.jobs().collect();
        jobs.sort();
        f.debug_struct("ProcessorRegistry").field("jobs", &jobs).finish()
    }
}
