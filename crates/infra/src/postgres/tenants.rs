use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{instrument, warn};
use uuid::Uuid;

use sweep_core::{Capability, JobDefinition, LocationId, OrgId, PlanTier, TenantHandle, TenantId};

use crate::jobs::{EnumerationError, TenantEnumerator};

use super::{describe_sqlx_error, execute_all};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS organizations (
        id          UUID PRIMARY KEY,
        tenant_id   UUID NOT NULL,
        plan_tier   TEXT NOT NULL,
        status      TEXT NOT NULL DEFAULT 'active',
        archived_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS locations (
        id           UUID PRIMARY KEY,
        org_id       UUID NOT NULL REFERENCES organizations(id),
        capabilities TEXT[] NOT NULL DEFAULT '{}',
        archived_at  TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS locations_org_id_idx ON locations (org_id)",
];

/// Enumerates active, non-archived locations of organizations whose plan is
/// at or above the job minimum.
#[derive(Debug, Clone)]
pub struct PostgresTenantDirectory {
    pool: PgPool,
}

impl PostgresTenantDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        execute_all(&self.pool, SCHEMA).await
    }
}

#[async_trait]
impl TenantEnumerator for PostgresTenantDirectory {
    #[instrument(skip(self, job), fields(job = %job.name), err)]
    async fn enumerate(&self, job: &JobDefinition) -> Result<Vec<TenantHandle>, EnumerationError> {
        let tiers: Vec<String> = job
            .min_plan
            .and_above()
            .map(|t| t.as_str().to_string())
            .collect();

        let rows = sqlx::query(
            r#"
            SELECT
                l.id AS location_id,
                o.id AS org_id,
                o.tenant_id,
                o.plan_tier,
                l.capabilities
            FROM locations l
            JOIN organizations o ON o.id = l.org_id
            WHERE o.status = 'active'
              AND o.archived_at IS NULL
              AND l.archived_at IS NULL
              AND o.plan_tier = ANY($1)
            ORDER BY o.id, l.id
            "#,
        )
        .bind(&tiers)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EnumerationError::new(describe_sqlx_error("enumerate_tenants", e)))?;

        let mut tenants = Vec::with_capacity(rows.len());
        for row in rows {
            let decode = |e: sqlx::Error| EnumerationError::new(describe_sqlx_error("decode_tenant", e));
            let location_id: Uuid = row.try_get("location_id").map_err(decode)?;
            let org_id: Uuid = row.try_get("org_id").map_err(decode)?;
            let tenant_id: Uuid = row.try_get("tenant_id").map_err(decode)?;
            let plan: String = row.try_get("plan_tier").map_err(decode)?;
            let capabilities: Vec<String> = row.try_get("capabilities").map_err(decode)?;

            let plan_tier: PlanTier = plan
                .parse()
                .map_err(|e| EnumerationError::new(format!("location {location_id}: {e}")))?;

            let known = capabilities.iter().filter_map(|c| match c.parse::<Capability>() {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!(location = %location_id, error = %e, "ignoring unknown capability");
                    None
                }
            });

            tenants.push(
                TenantHandle::new(
                    TenantId::from_uuid(tenant_id),
                    OrgId::from_uuid(org_id),
                    LocationId::from_uuid(location_id),
                    plan_tier,
                )
                .with_capabilities(known),
            );
        }

        Ok(tenants)
    }
}
