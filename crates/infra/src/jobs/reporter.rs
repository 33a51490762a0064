//! Turns a batch result (or invocation failure) into a log line, an error
//! tracker capture and a response body.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value as JsonValue, json};
use tracing::{error, info};

use sweep_core::{BatchResult, JobName, OrchestrationError};

/// External exception sink (Sentry-style).
pub trait ErrorTracker: Send + Sync {
    fn capture_exception(
        &self,
        error: &(dyn std::error::Error + 'static),
        tags: &BTreeMap<String, String>,
    );
}

/// Tracker that only emits an `error!` event. Used when no external sink is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorTracker;

impl ErrorTracker for TracingErrorTracker {
    fn capture_exception(
        &self,
        error: &(dyn std::error::Error + 'static),
        tags: &BTreeMap<String, String>,
    ) {
        error!(error = %error, tags = ?tags, "exception captured");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedException {
    pub message: String,
    pub tags: BTreeMap<String, String>,
}

/// Tracker that remembers every capture (tests).
#[derive(Debug, Default, Clone)]
pub struct InMemoryErrorTracker {
    captured: Arc<Mutex<Vec<CapturedException>>>,
}

impl InMemoryErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captured(&self) -> Vec<CapturedException> {
        self.captured
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

impl ErrorTracker for InMemoryErrorTracker {
    fn capture_exception(
        &self,
        error: &(dyn std::error::Error + 'static),
        tags: &BTreeMap<String, String>,
    ) {
        let mut captured = self.captured.lock().unwrap_or_else(|p| p.into_inner());
        captured.push(CapturedException {
            message: error.to_string(),
            tags: tags.clone(),
        });
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReportStatus {
    Ok,
    Failed,
}

/// Transport-neutral outcome of one invocation; the HTTP layer maps
/// `Failed` to 500.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub status: ReportStatus,
    pub body: JsonValue,
}

impl RunReport {
    pub fn is_ok(&self) -> bool {
        self.status == ReportStatus::Ok
    }
}

#[derive(Clone)]
pub struct ResultReporter {
    tracker: Arc<dyn ErrorTracker>,
    release_tag: String,
}

impl ResultReporter {
    pub fn new(tracker: Arc<dyn ErrorTracker>, release_tag: impl Into<String>) -> Self {
        Self {
            tracker,
            release_tag: release_tag.into(),
        }
    }

    pub fn release_tag(&self) -> &str {
        &self.release_tag
    }

    pub fn report(
        &self,
        job: JobName,
        outcome: Result<BatchResult, OrchestrationError>,
    ) -> RunReport {
        match outcome {
            Ok(result) => self.report_success(job, &result),
            Err(err) => self.report_failure(job, &err),
        }
    }

    /// Kill switch was on; nothing ran.
    pub fn halted(&self, job: JobName) -> RunReport {
        info!(job = %job, "batch run halted by kill switch");
        RunReport {
            status: ReportStatus::Ok,
            body: json!({ "ok": true, "halted": true }),
        }
    }

    /// Another invocation of the same job is still running here.
    pub fn overlapping(&self, job: JobName) -> RunReport {
        info!(job = %job, "batch run skipped; previous run still active");
        RunReport {
            status: ReportStatus::Ok,
            body: json!({ "ok": true, "overlapping": true }),
        }
    }

    fn report_success(&self, job: JobName, result: &BatchResult) -> RunReport {
        info!(
            job = %job,
            processed = result.processed,
            errors = result.errors,
            succeeded = result.succeeded(),
            skipped = result.skipped,
            duration_ms = result.duration_ms,
            cancelled = result.cancelled,
            counters = ?result.counters,
            error_details = ?result.error_details,
            "batch run finished"
        );

        let mut body = Map::new();
        for (name, value) in &result.counters {
            body.insert(name.clone(), json!(value));
        }
        // Fixed fields win over a counter of the same name.
        body.insert("ok".into(), json!(true));
        body.insert("processed".into(), json!(result.processed));
        body.insert("errors".into(), json!(result.errors));
        body.insert("skipped".into(), json!(result.skipped));
        body.insert("duration_ms".into(), json!(result.duration_ms));
        if result.cancelled {
            body.insert("cancelled".into(), json!(true));
        }

        RunReport {
            status: ReportStatus::Ok,
            body: JsonValue::Object(body),
        }
    }

    fn report_failure(&self, job: JobName, err: &OrchestrationError) -> RunReport {
        let tags = BTreeMap::from([
            ("job".to_string(), job.slug().to_string()),
            ("release".to_string(), self.release_tag.clone()),
        ]);
        self.tracker.capture_exception(err, &tags);
        error!(job = %job, error = %err, "batch run failed");

        RunReport {
            status: ReportStatus::Failed,
            body: json!({ "error": err.to_string() }),
        }
    }
}

impl std::fmt::Debug for ResultReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultReporter")
            .field("release_tag", &self.release_tag)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweep_core::{TenantId, TenantOutcome};

    fn reporter() -> (ResultReporter, InMemoryErrorTracker) {
        let tracker = InMemoryErrorTracker::new();
        (ResultReporter::new(Arc::new(tracker.clone()), "v1.2.3"), tracker)
    }

    #[test]
    fn success_body_carries_counts_and_counters() {
        let (reporter, tracker) = reporter();
        let mut result = BatchResult::new();
        result.record_success(TenantOutcome::new().with_counter("voice_queries", 12));
        result.record_failure(TenantId::new(), "timeout", 50);

        let report = reporter.report(JobName::Vaio, Ok(result));

        assert_eq!(report.status, ReportStatus::Ok);
        assert_eq!(report.body["ok"], json!(true));
        assert_eq!(report.body["processed"], json!(2));
        assert_eq!(report.body["errors"], json!(1));
        assert_eq!(report.body["voice_queries"], json!(12));
        assert!(report.body.get("cancelled").is_none());
        assert!(report.body.get("error_details").is_none());
        assert!(tracker.captured().is_empty());
    }

    #[test]
    fn empty_run_reports_zeroes() {
        let (reporter, _) = reporter();
        let report = reporter.report(JobName::NapSync, Ok(BatchResult::new()));
        assert_eq!(report.body["processed"], json!(0));
        assert_eq!(report.body["errors"], json!(0));
    }

    #[test]
    fn invocation_failure_is_captured_once_with_tags() {
        let (reporter, tracker) = reporter();
        let report = reporter.report(
            JobName::SchemaDrift,
            Err(OrchestrationError::enumeration("db unreachable")),
        );

        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.body, json!({ "error": "db unreachable" }));

        let captured = tracker.captured();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].message, "db unreachable");
        assert_eq!(captured[0].tags["job"], "schema-drift");
        assert_eq!(captured[0].tags["release"], "v1.2.3");
    }

    #[test]
    fn cancelled_flag_is_surfaced() {
        let (reporter, _) = reporter();
        let result = BatchResult {
            cancelled: true,
            ..Default::default()
        };
        let report = reporter.report(JobName::ReviewSync, Ok(result));
        assert_eq!(report.body["cancelled"], json!(true));
    }

    #[test]
    fn halted_and_overlapping_bodies() {
        let (reporter, tracker) = reporter();
        assert_eq!(
            reporter.halted(JobName::NapSync).body,
            json!({ "ok": true, "halted": true })
        );
        assert_eq!(
            reporter.overlapping(JobName::NapSync).body,
            json!({ "ok": true, "overlapping": true })
        );
        assert!(tracker.captured().is_empty());
    }
}
