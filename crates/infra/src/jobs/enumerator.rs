//! Tenant enumeration (data-store collaborator).

use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use sweep_core::{JobDefinition, OrchestrationError, TenantHandle};

/// The data store could not produce the tenant set.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EnumerationError {
    message: String,
}

impl EnumerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<EnumerationError> for OrchestrationError {
    fn from(value: EnumerationError) -> Self {
        OrchestrationError::Enumeration(value.message)
    }
}

/// Yields candidate tenants for a job.
///
/// Implementations pre-filter on "active, not archived, plan at or above the
/// job minimum". The runner re-checks full eligibility, so an enumerator that
/// over-returns only inflates `skipped`.
#[async_trait]
pub trait TenantEnumerator: Send + Sync {
    async fn enumerate(&self, job: &JobDefinition) -> Result<Vec<TenantHandle>, EnumerationError>;
}

/// In-memory tenant directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTenantDirectory {
    tenants: RwLock<Vec<TenantHandle>>,
}

impl InMemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenants(tenants: impl IntoIterator<Item = TenantHandle>) -> Self {
        Self {
            tenants: RwLock::new(tenants.into_iter().collect()),
        }
    }

    pub fn insert(&self, tenant: TenantHandle) {
        if let Ok(mut tenants) = self.tenants.write() {
            tenants.push(tenant);
        }
    }
}

#[async_trait]
impl TenantEnumerator for InMemoryTenantDirectory {
    async fn enumerate(&self, job: &JobDefinition) -> Result<Vec<TenantHandle>, EnumerationError> {
        let tenants = self
            .tenants
            .read()
            .map_err(|_| EnumerationError::new("tenant directory lock poisoned"))?;

        Ok(tenants
            .iter()
            .filter(|t| !t.archived && t.plan_tier >= job.min_plan)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweep_core::{JobName, LocationId, OrgId, PlanTier, TenantId};

    fn tenant(plan: PlanTier) -> TenantHandle {
        TenantHandle::new(TenantId::new(), OrgId::new(), LocationId::new(), plan)
    }

    #[tokio::test]
    async fn directory_prefilters_plan_and_archive() {
        let keep = tenant(PlanTier::Pro);
        let dir = InMemoryTenantDirectory::with_tenants([
            keep.clone(),
            tenant(PlanTier::Starter),
            tenant(PlanTier::Enterprise).archived(),
        ]);

        let def = JobDefinition::find(JobName::SchemaDrift).unwrap();
        let found = dir.enumerate(&def).await.unwrap();
        assert_eq!(found, vec![keep]);
    }

    #[test]
    fn enumeration_error_keeps_message_verbatim() {
        let err: OrchestrationError = EnumerationError::new("db unreachable").into();
        assert_eq!(err.to_string(), "db unreachable");
    }
}
