//! Postgres-backed collaborators.
//!
//! Every store owns a clone of one `PgPool` and exposes an idempotent
//! `migrate()` that creates its tables. Queries are plain `sqlx::query` with
//! positional binds; rows are decoded with `Row::try_get`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | Mapped message |
//! |------------|----------------|
//! | Database (with code) | `database error in {op} ({code}): {message}` |
//! | PoolClosed | `connection pool closed in {op}` |
//! | PoolTimedOut | `connection pool timed out in {op}` |
//! | Other | `sqlx error in {op}: {err}` |
//!
//! Each store wraps the message in its own error type (`EnumerationError`,
//! `LedgerError`, `StoreError`).

pub mod ledger;
pub mod places;
pub mod tenants;
pub mod tokens;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub use ledger::PostgresStepLedger;
pub use places::PostgresPlacesStore;
pub use tenants::PostgresTenantDirectory;
pub use tokens::PostgresTokenStore;

/// Open a pool for `database_url`.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Render a SQLx error for the given operation.
pub(crate) fn describe_sqlx_error(operation: &str, err: sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => format!(
                "database error in {operation} ({code}): {}",
                db_err.message()
            ),
            None => format!("database error in {operation}: {}", db_err.message()),
        },
        sqlx::Error::PoolClosed => format!("connection pool closed in {operation}"),
        sqlx::Error::PoolTimedOut => format!("connection pool timed out in {operation}"),
        other => format!("sqlx error in {operation}: {other}"),
    }
}

/// Run several DDL statements in order.
pub(crate) async fn execute_all(pool: &PgPool, statements: &[&str]) -> Result<(), sqlx::Error> {
    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
