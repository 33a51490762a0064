use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use sweep_core::LocationId;

use crate::functions::{PlaceDetails, PlacesStore, StaleLocation, StoreError};

use super::{describe_sqlx_error, execute_all};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS location_places (
        location_id       UUID PRIMARY KEY,
        place_id          TEXT,
        details           JSONB,
        last_refreshed_at TIMESTAMPTZ
    )
    "#,
    r#"
    ALTER TABLE location_places ADD COLUMN IF NOT EXISTS last_attempted_at TIMESTAMPTZ
    "#,
];

#[derive(Debug, Clone)]
pub struct PostgresPlacesStore {
    pool: PgPool,
}

impl PostgresPlacesStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        execute_all(&self.pool, SCHEMA).await
    }
}

#[async_trait]
impl PlacesStore for PostgresPlacesStore {
    async fn select_stale(
        &self,
        older_than: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<StaleLocation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT location_id, place_id, last_refreshed_at
            FROM location_places
            WHERE GREATEST(last_refreshed_at, last_attempted_at) IS NULL
               OR GREATEST(last_refreshed_at, last_attempted_at) < $1
            ORDER BY GREATEST(last_refreshed_at, last_attempted_at) ASC NULLS FIRST,
                     location_id ASC
            LIMIT $2
            "#,
        )
        .bind(older_than)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::new(describe_sqlx_error("select_stale", e)))?;

        rows.iter()
            .map(|row| -> Result<_, StoreError> {
                let decode = |e| StoreError::new(describe_sqlx_error("decode_place", e));
                Ok(StaleLocation {
                    location_id: LocationId::from_uuid(
                        row.try_get::<Uuid, _>("location_id").map_err(decode)?,
                    ),
                    place_id: row.try_get("place_id").map_err(decode)?,
                    last_refreshed_at: row.try_get("last_refreshed_at").map_err(decode)?,
                })
            })
            .collect()
    }

    async fn mark_refreshed(
        &self,
        location_id: LocationId,
        details: &PlaceDetails,
        refreshed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO location_places (location_id, place_id, details, last_refreshed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (location_id) DO UPDATE SET
                place_id = EXCLUDED.place_id,
                details = EXCLUDED.details,
                last_refreshed_at = EXCLUDED.last_refreshed_at
            "#,
        )
        .bind(location_id.as_uuid())
        .bind(&details.place_id)
        .bind(&details.details)
        .bind(refreshed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::new(describe_sqlx_error("mark_refreshed", e)))?;
        Ok(())
    }

    async fn mark_attempted(
        &self,
        location_id: LocationId,
        attempted_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE location_places SET last_attempted_at = $2 WHERE location_id = $1")
            .bind(location_id.as_uuid())
            .bind(attempted_at)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::new(describe_sqlx_error("mark_attempted", e)))?;
        Ok(())
    }
}
