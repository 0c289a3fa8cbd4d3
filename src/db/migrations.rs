//! Database initialization and schema versioning.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Bumped whenever `schema.sql` changes shape.
const SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Open (creating if needed) the ledger database and bring its schema up to date.
///
/// Every pooled connection runs with foreign keys on, WAL journaling, normal sync and
/// a five second busy timeout.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    let applied = apply_schema(&pool).await?;
    info!(path = %db_path, version = SCHEMA_VERSION, applied, "Lot ledger database ready");
    Ok(pool)
}

/// Statements of the bundled schema, comments and blanks dropped.
fn schema_statements() -> impl Iterator<Item = &'static str> {
    SCHEMA_SQL.split(';').map(str::trim).filter(|s| {
        s.lines()
            .any(|line| !line.trim().is_empty() && !line.trim_start().starts_with("--"))
    })
}

/// Apply the schema in one transaction and stamp `user_version`.
///
/// Returns false when the stored version is already current.
async fn apply_schema(pool: &SqlitePool) -> Result<bool, sqlx::Error> {
    let stored: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    if stored >= SCHEMA_VERSION {
        debug!(stored, "Schema already current");
        return Ok(false);
    }

    let mut tx = pool.begin().await?;
    for statement in schema_statements() {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    // PRAGMA does not take bind parameters.
    sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    debug!(from = stored, to = SCHEMA_VERSION, "Schema applied");
    Ok(true)
}
