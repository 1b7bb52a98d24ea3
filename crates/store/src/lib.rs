//! SQLite persistence layer.
//!
//! Provides database initialization, connection pooling, and CRUD
//! operations for all persistent entities. Uses SQLx with WAL mode for
//! concurrent access. Timestamps are stored as RFC 3339 text; UUIDs as
//! text. Counters that race across workers (quota, queue claims) are
//! updated with single conditional statements, never read-modify-write.

pub mod quota;
pub mod queue;
pub mod stages;
pub mod summaries;
pub mod tasks;
pub mod transcripts;
pub mod usage;

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};

use es_domain::error::{Error, Result};

/// Type alias for the SQLite connection pool.
pub type DbPool = sqlx::SqlitePool;

pub(crate) fn db_err(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}

pub(crate) fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_opt_time(s: Option<&str>) -> Option<DateTime<Utc>> {
    s.map(parse_time)
}

/// Initialize the SQLite database for the service.
///
/// Creates the file and parent directories if needed, configures WAL mode,
/// runs embedded migrations, and returns a connection pool.
pub async fn init_db(db_path: &str) -> Result<DbPool> {
    if let Some(parent) = std::path::Path::new(db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let connect_options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
        .map_err(db_err)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .idle_timeout(Duration::from_secs(300))
        .connect_with(connect_options)
        .await
        .map_err(db_err)?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

    Ok(pool)
}

/// In-memory database for tests.
pub async fn init_test_db() -> Result<DbPool> {
    let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(db_err)?
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options)
        .await
        .map_err(db_err)?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let pool = init_test_db().await.expect("init test db");
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' \
             AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .expect("query tables");

        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        for expected in [
            "job_queue",
            "quota_commits",
            "quota_entries",
            "summaries",
            "task_stages",
            "tasks",
            "transcript_segments",
            "usage_records",
        ] {
            assert!(names.contains(&expected), "missing table {expected}");
        }
    }

    #[test]
    fn time_round_trips() {
        let now = Utc::now();
        let parsed = parse_time(&fmt_time(now));
        assert!((parsed - now).num_microseconds().unwrap_or(0).abs() < 2);
    }
}
