//! Static catalog of cron-triggered batch jobs.
//!
//! Every job visits a set of tenants once per invocation. The catalog is fixed
//! at deployment time; the external scheduler is configured from it (see
//! `GET /cron`), and the kill-switch key of each job is derived from its slug.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ParseError;
use crate::tenant::{Capability, PlanTier, TenantHandle};

/// Name of a cron-triggered batch job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobName {
    AuthorityMapping,
    NapSync,
    ReviewSync,
    SchemaDrift,
    Vaio,
    CitationIntelligence,
}

impl JobName {
    pub const ALL: [JobName; 6] = [
        JobName::AuthorityMapping,
        JobName::NapSync,
        JobName::ReviewSync,
        JobName::SchemaDrift,
        JobName::Vaio,
        JobName::CitationIntelligence,
    ];

    /// URL/log slug (`/cron/{slug}`).
    pub fn slug(&self) -> &'static str {
        match self {
            JobName::AuthorityMapping => "authority-mapping",
            JobName::NapSync => "nap-sync",
            JobName::ReviewSync => "review-sync",
            JobName::SchemaDrift => "schema-drift",
            JobName::Vaio => "vaio",
            JobName::CitationIntelligence => "citation-intelligence",
        }
    }

    /// Environment key of this job's kill switch, e.g. `STOP_NAP_SYNC_CRON`.
    pub fn kill_switch_key(&self) -> String {
        format!("STOP_{}_CRON", self.slug().to_ascii_uppercase().replace('-', "_"))
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for JobName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobName::ALL
            .into_iter()
            .find(|j| j.slug() == s)
            .ok_or_else(|| ParseError::UnknownJob(s.to_string()))
    }
}

/// The unit a job iterates (and counts) by.
///
/// `processed` in a `BatchResult` always counts this unit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationUnit {
    /// One attempt per location.
    Location,
    /// One attempt per organization; locations of the same org are collapsed.
    Organization,
}

/// Outcome of the per-job eligibility check for one tenant.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Ineligible(&'static str),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

/// Immutable definition of a batch job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobDefinition {
    pub name: JobName,
    /// Cron expression the external scheduler uses (UTC).
    pub schedule: &'static str,
    pub kill_switch_env_key: String,
    pub iteration_unit: IterationUnit,
    pub min_plan: PlanTier,
    pub required_capabilities: Vec<Capability>,
    pub description: &'static str,
}

impl JobDefinition {
    fn define(
        name: JobName,
        schedule: &'static str,
        iteration_unit: IterationUnit,
        required_capabilities: Vec<Capability>,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            schedule,
            kill_switch_env_key: name.kill_switch_key(),
            iteration_unit,
            min_plan: PlanTier::Growth,
            required_capabilities,
            description,
        }
    }

    /// All batch jobs known to this deployment.
    ///
    /// Iteration units:
    /// - `authority-mapping`, `nap-sync`, `review-sync`, `schema-drift`, `vaio`: per location
    /// - `citation-intelligence`: per organization (citations are tracked at brand level)
    pub fn catalog() -> Vec<JobDefinition> {
        use Capability::*;
        use IterationUnit::*;

        vec![
            Self::define(
                JobName::AuthorityMapping,
                "0 4 * * 1",
                Location,
                vec![Website],
                "Map topical authority of each location website",
            ),
            Self::define(
                JobName::NapSync,
                "0 */6 * * *",
                Location,
                vec![GoogleProfile],
                "Sync name/address/phone against the business profile",
            ),
            Self::define(
                JobName::ReviewSync,
                "15 * * * *",
                Location,
                vec![GoogleProfile],
                "Pull and classify new reviews",
            ),
            Self::define(
                JobName::SchemaDrift,
                "0 3 * * *",
                Location,
                vec![Website],
                "Score structured-data drift on location pages",
            ),
            Self::define(
                JobName::Vaio,
                "0 5 * * 2",
                Location,
                vec![Website, VoiceSearch],
                "Voice assistant optimization audit",
            ),
            Self::define(
                JobName::CitationIntelligence,
                "0 2 * * 0",
                Organization,
                vec![Citations],
                "Aggregate citation coverage per organization",
            ),
        ]
    }

    /// Look up a cataloged definition by name.
    pub fn find(name: JobName) -> Option<JobDefinition> {
        Self::catalog().into_iter().find(|d| d.name == name)
    }

    /// Per-job eligibility: not archived, plan at or above the minimum, and
    /// every required capability configured.
    pub fn eligibility(&self, tenant: &TenantHandle) -> Eligibility {
        if tenant.archived {
            return Eligibility::Ineligible("archived");
        }
        if tenant.plan_tier < self.min_plan {
            return Eligibility::Ineligible("plan below minimum");
        }
        if !self.required_capabilities.iter().all(|c| tenant.has(*c)) {
            return Eligibility::Ineligible("missing capability");
        }
        Eligibility::Eligible
    }
}
