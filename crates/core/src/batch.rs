//! Aggregate outcome of one batch run.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::id::TenantId;

/// Error messages are cut to this many characters before they are kept.
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// One tenant-level failure, kept for logging only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub tenant_id: TenantId,
    pub message: String,
}

/// What a successful per-tenant call reports back.
///
/// Counters are summed across the run and surfaced in the response (VAIO, for
/// example, reports `voice_queries`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantOutcome {
    pub counters: BTreeMap<String, u64>,
}

impl TenantOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_counter(mut self, name: impl Into<String>, value: u64) -> Self {
        *self.counters.entry(name.into()).or_default() += value;
        self
    }
}

/// Aggregate result of one batch invocation.
///
/// `processed` counts attempts, not successes: a tenant whose processor failed
/// is counted in both `processed` and `errors`, exactly once each.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub processed: u64,
    pub errors: u64,
    /// Units enumerated but not attempted because they failed the job's
    /// eligibility check.
    pub skipped: u64,
    pub error_details: Vec<ErrorDetail>,
    pub duration_ms: u64,
    pub counters: BTreeMap<String, u64>,
    /// Set when the time budget ran out before every unit completed.
    pub cancelled: bool,
}

impl BatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, outcome: TenantOutcome) {
        self.processed += 1;
        for (name, value) in outcome.counters {
            *self.counters.entry(name).or_default() += value;
        }
    }

    /// Count a failed attempt. Details beyond `max_details` are dropped; the
    /// counts stay exact.
    pub fn record_failure(&mut self, tenant_id: TenantId, message: &str, max_details: usize) {
        self.processed += 1;
        self.errors += 1;
        if self.error_details.len() < max_details {
            self.error_details.push(ErrorDetail {
                tenant_id,
                message: truncate(message),
            });
        }
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn finish(&mut self, elapsed: Duration) {
        self.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }

    /// Attempts that did not fail.
    pub fn succeeded(&self) -> u64 {
        self.processed.saturating_sub(self.errors)
    }
}

fn truncate(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_MESSAGE_LEN {
        message.to_string()
    } else {
        message.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
    }
}
