use std::sync::Arc;

use tracing::debug;

use sweep_core::{JobDefinition, JobName, OrchestrationError};

use crate::config::{ConfigSource, KillSwitches};

use super::enumerator::TenantEnumerator;
use super::guard::RunGuard;
use super::processor::ProcessorRegistry;
use super::reporter::{ResultReporter, RunReport};
use super::runner::{BatchRunner, RunnerConfig};

/// One cron invocation, end to end: kill switch → overlap guard → batch run →
/// report.
#[derive(Clone)]
pub struct CronService {
    catalog: Vec<JobDefinition>,
    enumerator: Arc<dyn TenantEnumerator>,
    processors: ProcessorRegistry,
    reporter: ResultReporter,
    config: Arc<dyn ConfigSource>,
    runner_config: RunnerConfig,
    active: RunGuard<JobName>,
}

impl CronService {
    pub fn new(
        enumerator: Arc<dyn TenantEnumerator>,
        processors: ProcessorRegistry,
        reporter: ResultReporter,
        config: Arc<dyn ConfigSource>,
        runner_config: RunnerConfig,
    ) -> Self {
        Self {
            catalog: JobDefinition::catalog(),
            enumerator,
            processors,
            reporter,
            config,
            runner_config,
            active: RunGuard::new(),
        }
    }

    pub fn catalog(&self) -> &[JobDefinition] {
        &self.catalog
    }

    pub fn definition(&self, job: JobName) -> Option<&JobDefinition> {
        self.catalog.iter().find(|d| d.name == job)
    }

    /// Current kill-switch state for every cataloged job.
    pub fn kill_switches(&self) -> KillSwitches {
        KillSwitches::capture(self.config.as_ref(), &self.catalog)
    }

    /// Kill switches are read fresh here, once, and not consulted again for
    /// the rest of the invocation.
    pub async fn invoke(&self, job: JobName) -> RunReport {
        let switches = self.kill_switches();
        if switches.is_halted(job) {
            return self.reporter.halted(job);
        }

        let Some(_lease) = self.active.try_acquire(job) else {
            return self.reporter.overlapping(job);
        };

        let outcome = match self.runner(job) {
            Ok(runner) => runner.run().await,
            Err(e) => Err(e),
        };
        debug!(job = %job, ok = outcome.is_ok(), "invocation complete");
        self.reporter.report(job, outcome)
    }

    fn runner(&self, job: JobName) -> Result<BatchRunner, OrchestrationError> {
        let definition = self
            .definition(job)
            .cloned()
            .ok_or_else(|| OrchestrationError::UnknownJob(job.to_string()))?;
        let processor = self
            .processors
            .get(job)
            .ok_or_else(|| OrchestrationError::MissingProcessor(job.to_string()))?;

        Ok(
            BatchRunner::new(definition, self.enumerator.clone(), processor)
                .with_config(self.runner_config.clone()),
        )
    }
}

impl std::fmt::Debug for CronService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronService")
            .field("processors", &self.processors)
            .field("reporter", &self.reporter)
            .field("runner_config", &self.runner_config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use sweep_core::{
        Capability, CollaboratorError, LocationId, OrgId, PlanTier, TenantHandle, TenantId,
        TenantOutcome,
    };

    use crate::config::MapConfig;
    use crate::jobs::enumerator::{EnumerationError, InMemoryTenantDirectory};
    use crate::jobs::processor::TenantProcessor;
    use crate::jobs::reporter::{InMemoryErrorTracker, ReportStatus};

    #[derive(Default)]
    struct CountingProcessor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TenantProcessor for CountingProcessor {
        async fn process(&self, _tenant: &TenantHandle) -> Result<TenantOutcome, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TenantOutcome::new())
        }
    }

    #[derive(Default)]
    struct CountingEnumerator {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TenantEnumerator for CountingEnumerator {
        async fn enumerate(&self, _job: &JobDefinition) -> Result<Vec<TenantHandle>, EnumerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EnumerationError::new("db unreachable"));
            }
            Ok(vec![
                TenantHandle::new(TenantId::new(), OrgId::new(), LocationId::new(), PlanTier::Growth)
                    .with_capability(Capability::GoogleProfile),
            ])
        }
    }

    struct Fixture {
        service: CronService,
        config: Arc<MapConfig>,
        processor: Arc<CountingProcessor>,
        tracker: InMemoryErrorTracker,
    }

    fn fixture(enumerator: Arc<dyn TenantEnumerator>) -> Fixture {
        let config = Arc::new(MapConfig::new());
        let processor = Arc::new(CountingProcessor::default());
        let tracker = InMemoryErrorTracker::new();
        let service = CronService::new(
            enumerator,
            ProcessorRegistry::new().with(JobName::NapSync, processor.clone()),
            ResultReporter::new(Arc::new(tracker.clone()), "test"),
            config.clone(),
            RunnerConfig::default(),
        );
        Fixture {
            service,
            config,
            processor,
            tracker,
        }
    }

    #[tokio::test]
    async fn halted_job_never_reaches_the_processor() {
        let enumerator = Arc::new(CountingEnumerator::default());
        let fx = fixture(enumerator.clone());
        fx.config.set("STOP_NAP_SYNC_CRON", "true");

        let report = fx.service.invoke(JobName::NapSync).await;

        assert_eq!(report.body, json!({ "ok": true, "halted": true }));
        assert_eq!(enumerator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.processor.calls.load(Ordering::SeqCst), 0);

        fx.config.remove("STOP_NAP_SYNC_CRON");
        let report = fx.service.invoke(JobName::NapSync).await;
        assert_eq!(report.body["processed"], json!(1));
    }

    #[tokio::test]
    async fn enumeration_failure_is_reported_once() {
        let fx = fixture(Arc::new(CountingEnumerator {
            fail: true,
            ..Default::default()
        }));

        let report = fx.service.invoke(JobName::NapSync).await;

        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.body, json!({ "error": "db unreachable" }));
        let captured = fx.tracker.captured();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].tags["job"], "nap-sync");
        assert_eq!(fx.processor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn overlapping_invocation_does_no_work() {
        let fx = fixture(Arc::new(InMemoryTenantDirectory::new()));
        let _held = fx.service.active.try_acquire(JobName::NapSync);

        let report = fx.service.invoke(JobName::NapSync).await;
        assert_eq!(report.body, json!({ "ok": true, "overlapping": true }));
    }

    #[tokio::test]
    async fn job_without_processor_is_an_invocation_failure() {
        let fx = fixture(Arc::new(InMemoryTenantDirectory::new()));
        let report = fx.service.invoke(JobName::Vaio).await;

        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(fx.tracker.captured().len(), 1);
    }
}
