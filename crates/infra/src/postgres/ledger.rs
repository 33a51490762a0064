use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use sweep_core::RunId;

use crate::durable::{LedgerError, RunRecord, RunStatus, StepLedger, StepRecord};

use super::{describe_sqlx_error, execute_all};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS function_runs (
        run_id      UUID PRIMARY KEY,
        function    TEXT NOT NULL,
        event_name  TEXT NOT NULL,
        status      TEXT NOT NULL,
        output      JSONB,
        error       TEXT,
        deliveries  INTEGER NOT NULL DEFAULT 1,
        started_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        finished_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS function_steps (
        run_id       UUID NOT NULL REFERENCES function_runs(run_id),
        step_name    TEXT NOT NULL,
        status       TEXT NOT NULL,
        attempts     INTEGER NOT NULL,
        output       JSONB,
        last_error   TEXT,
        created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        completed_at TIMESTAMPTZ,
        PRIMARY KEY (run_id, step_name)
    )
    "#,
];

/// Step ledger in `function_runs` / `function_steps`.
///
/// All writes are upserts keyed by `run_id` and `(run_id, step_name)`, so a
/// replayed delivery updates rows in place.
#[derive(Debug, Clone)]
pub struct PostgresStepLedger {
    pool: PgPool,
}

impl PostgresStepLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        execute_all(&self.pool, SCHEMA).await
    }
}

fn storage(operation: &str) -> impl FnOnce(sqlx::Error) -> LedgerError + '_ {
    move |e| LedgerError::Storage(describe_sqlx_error(operation, e))
}

fn decode(e: sqlx::Error) -> LedgerError {
    LedgerError::Corrupt(describe_sqlx_error("decode", e))
}

fn run_from_row(row: &PgRow) -> Result<RunRecord, LedgerError> {
    let run_id: Uuid = row.try_get("run_id").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let deliveries: i32 = row.try_get("deliveries").map_err(decode)?;
    Ok(RunRecord {
        run_id: RunId::from_uuid(run_id),
        function: row.try_get("function").map_err(decode)?,
        event_name: row.try_get("event_name").map_err(decode)?,
        status: status.parse()?,
        output: row.try_get::<Option<JsonValue>, _>("output").map_err(decode)?,
        error: row.try_get("error").map_err(decode)?,
        deliveries: u32::try_from(deliveries).unwrap_or(0),
        started_at: row.try_get::<DateTime<Utc>, _>("started_at").map_err(decode)?,
        finished_at: row.try_get("finished_at").map_err(decode)?,
    })
}

fn step_from_row(row: &PgRow) -> Result<StepRecord, LedgerError> {
    let run_id: Uuid = row.try_get("run_id").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let attempts: i32 = row.try_get("attempts").map_err(decode)?;
    Ok(StepRecord {
        run_id: RunId::from_uuid(run_id),
        name: row.try_get("step_name").map_err(decode)?,
        status: status.parse()?,
        attempts: u32::try_from(attempts).unwrap_or(0),
        output: row.try_get::<Option<JsonValue>, _>("output").map_err(decode)?,
        last_error: row.try_get("last_error").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
        completed_at: row.try_get("completed_at").map_err(decode)?,
    })
}

#[async_trait]
impl StepLedger for PostgresStepLedger {
    #[instrument(skip(self), fields(run_id = %run_id), err)]
    async fn start_run(
        &self,
        run_id: RunId,
        function: &str,
        event_name: &str,
    ) -> Result<RunRecord, LedgerError> {
        let row = sqlx::query(
            r#"
            INSERT INTO function_runs (run_id, function, event_name, status)
            VALUES ($1, $2, $3, 'running')
            ON CONFLICT (run_id) DO UPDATE SET
                status = 'running',
                error = NULL,
                finished_at = NULL,
                deliveries = function_runs.deliveries + 1
            RETURNING *
            "#,
        )
        .bind(run_id.as_uuid())
        .bind(function)
        .bind(event_name)
        .fetch_one(&self.pool)
        .await
        .map_err(storage("start_run"))?;

        run_from_row(&row)
    }

    #[instrument(skip(self, output, error), fields(run_id = %run_id, status = status.as_str()), err)]
    async fn finish_run(
        &self,
        run_id: RunId,
        status: RunStatus,
        output: Option<JsonValue>,
        error: Option<String>,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE function_runs
            SET status = $2, output = $3, error = $4, finished_at = NOW()
            WHERE run_id = $1
            "#,
        )
        .bind(run_id.as_uuid())
        .bind(status.as_str())
        .bind(output)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(storage("finish_run"))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::Storage(format!("run not started: {run_id}")));
        }
        Ok(())
    }

    async fn get_run(&self, run_id: RunId) -> Result<Option<RunRecord>, LedgerError> {
        let row = sqlx::query("SELECT * FROM function_runs WHERE run_id = $1")
            .bind(run_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("get_run"))?;

        row.as_ref().map(run_from_row).transpose()
    }

    async fn load_step(&self, run_id: RunId, name: &str) -> Result<Option<StepRecord>, LedgerError> {
        let row = sqlx::query("SELECT * FROM function_steps WHERE run_id = $1 AND step_name = $2")
            .bind(run_id.as_uuid())
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("load_step"))?;

        row.as_ref().map(step_from_row).transpose()
    }

    async fn record_attempt_failure(
        &self,
        run_id: RunId,
        name: &str,
        attempt: u32,
        error: &str,
        exhausted: bool,
    ) -> Result<(), LedgerError> {
        let status = if exhausted { "failed" } else { "retrying" };
        sqlx::query(
            r#"
            INSERT INTO function_steps (run_id, step_name, status, attempts, last_error)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (run_id, step_name) DO UPDATE SET
                status = EXCLUDED.status,
                attempts = EXCLUDED.attempts,
                last_error = EXCLUDED.last_error,
                updated_at = NOW()
            "#,
        )
        .bind(run_id.as_uuid())
        .bind(name)
        .bind(status)
        .bind(i32::try_from(attempt).unwrap_or(i32::MAX))
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(storage("record_attempt_failure"))?;
        Ok(())
    }

    async fn record_step_success(
        &self,
        run_id: RunId,
        name: &str,
        attempts: u32,
        output: JsonValue,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO function_steps (run_id, step_name, status, attempts, output, completed_at)
            VALUES ($1, $2, 'completed', $3, $4, NOW())
            ON CONFLICT (run_id, step_name) DO UPDATE SET
                status = 'completed',
                attempts = EXCLUDED.attempts,
                output = EXCLUDED.output,
                updated_at = NOW(),
                completed_at = NOW()
            "#,
        )
        .bind(run_id.as_uuid())
        .bind(name)
        .bind(i32::try_from(attempts).unwrap_or(i32::MAX))
        .bind(output)
        .execute(&self.pool)
        .await
        .map_err(storage("record_step_success"))?;
        Ok(())
    }

    async fn list_steps(&self, run_id: RunId) -> Result<Vec<StepRecord>, LedgerError> {
        let rows = sqlx::query(
            "SELECT * FROM function_steps WHERE run_id = $1 ORDER BY created_at ASC, step_name ASC",
        )
        .bind(run_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(storage("list_steps"))?;

        rows.iter().map(step_from_row).collect()
    }
}
