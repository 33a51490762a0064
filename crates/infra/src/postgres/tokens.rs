use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use sweep_core::{ConnectionId, LocationId};

use crate::functions::{ExpiringToken, StoreError, TokenStore};

use super::{describe_sqlx_error, execute_all};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS oauth_connections (
        id           UUID PRIMARY KEY,
        location_id  UUID NOT NULL,
        provider     TEXT NOT NULL,
        expires_at   TIMESTAMPTZ NOT NULL,
        revoked_at   TIMESTAMPTZ,
        refreshed_at TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS oauth_connections_expires_at_idx ON oauth_connections (expires_at)",
];

#[derive(Debug, Clone)]
pub struct PostgresTokenStore {
    pool: PgPool,
}

impl PostgresTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        execute_all(&self.pool, SCHEMA).await
    }
}

#[async_trait]
impl TokenStore for PostgresTokenStore {
    async fn find_expiring(&self, before: DateTime<Utc>) -> Result<Vec<ExpiringToken>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, location_id, provider, expires_at
            FROM oauth_connections
            WHERE revoked_at IS NULL AND expires_at <= $1
            ORDER BY expires_at ASC, id ASC
            "#,
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::new(describe_sqlx_error("find_expiring", e)))?;

        rows.iter()
            .map(|row| -> Result<_, StoreError> {
                let decode = |e| StoreError::new(describe_sqlx_error("decode_connection", e));
                Ok(ExpiringToken {
                    connection_id: ConnectionId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode)?),
                    location_id: LocationId::from_uuid(
                        row.try_get::<Uuid, _>("location_id").map_err(decode)?,
                    ),
                    provider: row.try_get("provider").map_err(decode)?,
                    expires_at: row.try_get("expires_at").map_err(decode)?,
                })
            })
            .collect()
    }

    async fn save_refreshed(
        &self,
        connection_id: ConnectionId,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE oauth_connections
            SET expires_at = $2, refreshed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(connection_id.as_uuid())
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::new(describe_sqlx_error("save_refreshed", e)))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::new(format!("unknown connection {connection_id}")));
        }
        Ok(())
    }
}
