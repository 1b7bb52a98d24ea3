//! Stage attempt records.
//!
//! One row per attempt; only one row per (task, stage_type) is active.
//! Starting a stage archives any previous active row, which is what makes
//! retries auditable and completion checks idempotent.

use chrono::Utc;
use uuid::Uuid;

use es_domain::error::{Error, Result};
use es_domain::task::{StageStatus, StageType, TaskStage};

use crate::{db_err, fmt_time, parse_opt_time, DbPool};

#[derive(sqlx::FromRow)]
struct StageRow {
    id: i64,
    task_id: String,
    stage_type: String,
    status: String,
    attempt_id: String,
    is_active: i64,
    started_at: Option<String>,
    completed_at: Option<String>,
    error_message: Option<String>,
}

impl StageRow {
    fn into_stage(self) -> Result<TaskStage> {
        Ok(TaskStage {
            id: self.id,
            task_id: Uuid::parse_str(&self.task_id).map_err(|e| Error::Database(e.to_string()))?,
            stage_type: StageType::parse(&self.stage_type)
                .ok_or_else(|| Error::Database(format!("bad stage_type {}", self.stage_type)))?,
            status: StageStatus::parse(&self.status)
                .ok_or_else(|| Error::Database(format!("bad stage status {}", self.status)))?,
            attempt_id: Uuid::parse_str(&self.attempt_id)
                .map_err(|e| Error::Database(e.to_string()))?,
            is_active: self.is_active != 0,
            started_at: parse_opt_time(self.started_at.as_deref()),
            completed_at: parse_opt_time(self.completed_at.as_deref()),
            error_message: self.error_message,
        })
    }
}

const COLS: &str =
    "id, task_id, stage_type, status, attempt_id, is_active, started_at, completed_at, error_message";

/// The active row for a (task, stage), if any.
pub async fn active_stage(
    pool: &DbPool,
    task_id: Uuid,
    stage_type: StageType,
) -> Result<Option<TaskStage>> {
    let row: Option<StageRow> = sqlx::query_as(&format!(
        "SELECT {COLS} FROM task_stages WHERE task_id = ? AND stage_type = ? AND is_active = 1"
    ))
    .bind(task_id.to_string())
    .bind(stage_type.as_str())
    .fetch_optional(pool)
    .await
    .map_err(db_err)?;
    row.map(StageRow::into_stage).transpose()
}

/// All active rows for a task in insertion order (for the API detail view
/// and the prefix invariant).
pub async fn active_stages(pool: &DbPool, task_id: Uuid) -> Result<Vec<TaskStage>> {
    let rows: Vec<StageRow> = sqlx::query_as(&format!(
        "SELECT {COLS} FROM task_stages WHERE task_id = ? AND is_active = 1 ORDER BY id"
    ))
    .bind(task_id.to_string())
    .fetch_all(pool)
    .await
    .map_err(db_err)?;
    rows.into_iter().map(StageRow::into_stage).collect()
}

/// Begin a fresh attempt: archive any previous active row for this stage
/// and insert a running one. Returns the new attempt.
pub async fn start_stage(pool: &DbPool, task_id: Uuid, stage_type: StageType) -> Result<TaskStage> {
    let mut tx = pool.begin().await.map_err(db_err)?;

    sqlx::query(
        "UPDATE task_stages SET is_active = 0 \
         WHERE task_id = ? AND stage_type = ? AND is_active = 1",
    )
    .bind(task_id.to_string())
    .bind(stage_type.as_str())
    .execute(&mut *tx)
    .await
    .map_err(db_err)?;

    let attempt_id = Uuid::new_v4();
    let started_at = Utc::now();
    let res = sqlx::query(
        "INSERT INTO task_stages (task_id, stage_type, status, attempt_id, is_active, started_at) \
         VALUES (?, ?, 'running', ?, 1, ?)",
    )
    .bind(task_id.to_string())
    .bind(stage_type.as_str())
    .bind(attempt_id.to_string())
    .bind(fmt_time(started_at))
    .execute(&mut *tx)
    .await
    .map_err(db_err)?;

    tx.commit().await.map_err(db_err)?;

    Ok(TaskStage {
        id: res.last_insert_rowid(),
        task_id,
        stage_type,
        status: StageStatus::Running,
        attempt_id,
        is_active: true,
        started_at: Some(started_at),
        completed_at: None,
        error_message: None,
    })
}

pub async fn complete_stage(pool: &DbPool, stage_id: i64) -> Result<()> {
    finish(pool, stage_id, StageStatus::Completed, None).await
}

pub async fn fail_stage(pool: &DbPool, stage_id: i64, error_message: &str) -> Result<()> {
    finish(pool, stage_id, StageStatus::Failed, Some(error_message)).await
}

/// Mark a stage row skipped (e.g. resolve for upload sources when a record
/// is still wanted for the audit trail).
pub async fn skip_stage(pool: &DbPool, stage_id: i64) -> Result<()> {
    finish(pool, stage_id, StageStatus::Skipped, None).await
}

async fn finish(
    pool: &DbPool,
    stage_id: i64,
    status: StageStatus,
    error_message: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE task_stages SET status = ?, completed_at = ?, error_message = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(fmt_time(Utc::now()))
        .bind(error_message)
        .bind(stage_id)
        .execute(pool)
        .await
        .map_err(db_err)?;
    Ok(())
}
