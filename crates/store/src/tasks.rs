//! CRUD operations for tasks.
//!
//! Progress updates are guarded in SQL (`MAX(progress, ?)`) so a late
//! writer can never move a live task's progress backwards, and terminal
//! statuses are never overwritten.

use chrono::Utc;
use uuid::Uuid;

use es_domain::error::{Error, Result};
use es_domain::task::{SourceType, Task, TaskOptions, TaskStatus};

use crate::{db_err, fmt_time, parse_opt_time, parse_time, DbPool};

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    user_id: String,
    title: Option<String>,
    source_type: String,
    file_key: Option<String>,
    content_hash: Option<String>,
    source_url: Option<String>,
    options: String,
    status: String,
    progress: i64,
    duration_seconds: Option<f64>,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl TaskRow {
    fn into_task(self) -> Result<Task> {
        Ok(Task {
            id: Uuid::parse_str(&self.id).map_err(|e| Error::Database(e.to_string()))?,
            user_id: self.user_id,
            title: self.title,
            source_type: SourceType::parse(&self.source_type)
                .ok_or_else(|| Error::Database(format!("bad source_type {}", self.source_type)))?,
            file_key: self.file_key,
            content_hash: self.content_hash,
            source_url: self.source_url,
            options: serde_json::from_str::<TaskOptions>(&self.options).unwrap_or_default(),
            status: TaskStatus::parse(&self.status)
                .ok_or_else(|| Error::Database(format!("bad status {}", self.status)))?,
            progress: self.progress.clamp(0, 100) as u8,
            duration_seconds: self.duration_seconds,
            error_message: self.error_message,
            created_at: parse_time(&self.created_at),
            updated_at: parse_time(&self.updated_at),
            deleted_at: parse_opt_time(self.deleted_at.as_deref()),
        })
    }
}

const SELECT_COLS: &str = "id, user_id, title, source_type, file_key, content_hash, source_url, \
     options, status, progress, duration_seconds, error_message, created_at, updated_at, deleted_at";

pub async fn insert_task(pool: &DbPool, task: &Task) -> Result<()> {
    sqlx::query(
        "INSERT INTO tasks (id, user_id, title, source_type, file_key, content_hash, source_url, \
         options, status, progress, duration_seconds, error_message, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(task.id.to_string())
    .bind(&task.user_id)
    .bind(&task.title)
    .bind(task.source_type.as_str())
    .bind(&task.file_key)
    .bind(&task.content_hash)
    .bind(&task.source_url)
    .bind(serde_json::to_string(&task.options)?)
    .bind(task.status.as_str())
    .bind(i64::from(task.progress))
    .bind(task.duration_seconds)
    .bind(&task.error_message)
    .bind(fmt_time(task.created_at))
    .bind(fmt_time(task.updated_at))
    .execute(pool)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn get_task(pool: &DbPool, id: Uuid) -> Result<Option<Task>> {
    let row: Option<TaskRow> =
        sqlx::query_as(&format!("SELECT {SELECT_COLS} FROM tasks WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(pool)
            .await
            .map_err(db_err)?;
    row.map(TaskRow::into_task).transpose()
}

/// Dedup lookup: a completed, non-deleted task with this content hash owned
/// by the same user ("instant upload").
pub async fn find_completed_by_hash(
    pool: &DbPool,
    user_id: &str,
    content_hash: &str,
) -> Result<Option<Task>> {
    let row: Option<TaskRow> = sqlx::query_as(&format!(
        "SELECT {SELECT_COLS} FROM tasks \
         WHERE user_id = ? AND content_hash = ? AND status = 'completed' AND deleted_at IS NULL \
         ORDER BY created_at DESC LIMIT 1"
    ))
    .bind(user_id)
    .bind(content_hash)
    .fetch_optional(pool)
    .await
    .map_err(db_err)?;
    row.map(TaskRow::into_task).transpose()
}

/// Paged listing of a user's non-deleted tasks, newest first.
pub async fn list_tasks(
    pool: &DbPool,
    user_id: &str,
    status: Option<TaskStatus>,
    page: u32,
    page_size: u32,
) -> Result<(Vec<Task>, i64)> {
    let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);
    let status_filter = status.map(|s| s.as_str().to_string());

    let total: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tasks WHERE user_id = ? AND deleted_at IS NULL \
         AND (? IS NULL OR status = ?)",
    )
    .bind(user_id)
    .bind(&status_filter)
    .bind(&status_filter)
    .fetch_one(pool)
    .await
    .map_err(db_err)?;

    let rows: Vec<TaskRow> = sqlx::query_as(&format!(
        "SELECT {SELECT_COLS} FROM tasks WHERE user_id = ? AND deleted_at IS NULL \
         AND (? IS NULL OR status = ?) \
         ORDER BY created_at DESC LIMIT ? OFFSET ?"
    ))
    .bind(user_id)
    .bind(&status_filter)
    .bind(&status_filter)
    .bind(i64::from(page_size))
    .bind(offset)
    .fetch_all(pool)
    .await
    .map_err(db_err)?;

    let tasks = rows
        .into_iter()
        .map(TaskRow::into_task)
        .collect::<Result<Vec<_>>>()?;
    Ok((tasks, total.0))
}

/// Move a live task to a new status/progress. Progress can only grow, and
/// terminal statuses are final.
pub async fn update_status_progress(
    pool: &DbPool,
    id: Uuid,
    status: TaskStatus,
    progress: u8,
) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET status = ?, progress = MAX(progress, ?), updated_at = ? \
         WHERE id = ? AND status NOT IN ('completed', 'failed')",
    )
    .bind(status.as_str())
    .bind(i64::from(progress.min(100)))
    .bind(fmt_time(Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Terminal failure: set status, keep the progress reached, record the error.
pub async fn mark_failed(pool: &DbPool, id: Uuid, error_message: &str) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET status = 'failed', error_message = ?, updated_at = ? \
         WHERE id = ? AND status != 'completed'",
    )
    .bind(error_message)
    .bind(fmt_time(Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn mark_completed(pool: &DbPool, id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET status = 'completed', progress = 100, updated_at = ? \
         WHERE id = ? AND status != 'failed'",
    )
    .bind(fmt_time(Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn set_duration(pool: &DbPool, id: Uuid, duration_seconds: f64) -> Result<()> {
    sqlx::query("UPDATE tasks SET duration_seconds = ?, updated_at = ? WHERE id = ?")
        .bind(duration_seconds)
        .bind(fmt_time(Utc::now()))
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(db_err)?;
    Ok(())
}

/// Record the storage key once the upload stage lands (also used when the
/// resolve stage rewrites an URL source into a concrete object).
pub async fn set_file_key(pool: &DbPool, id: Uuid, file_key: &str, content_hash: &str) -> Result<()> {
    sqlx::query("UPDATE tasks SET file_key = ?, content_hash = ?, updated_at = ? WHERE id = ?")
        .bind(file_key)
        .bind(content_hash)
        .bind(fmt_time(Utc::now()))
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(db_err)?;
    Ok(())
}

/// Soft delete. Returns false when the task does not exist or is already
/// deleted.
pub async fn soft_delete(pool: &DbPool, id: Uuid, user_id: &str) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE tasks SET deleted_at = ?, updated_at = ? \
         WHERE id = ? AND user_id = ? AND deleted_at IS NULL",
    )
    .bind(fmt_time(Utc::now()))
    .bind(fmt_time(Utc::now()))
    .bind(id.to_string())
    .bind(user_id)
    .execute(pool)
    .await
    .map_err(db_err)?;
    Ok(res.rows_affected() > 0)
}

#[cfg(test)]
pub(crate) fn sample_task(user_id: &str) -> Task {
    Task {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        title: Some("standup".into()),
        source_type: SourceType::Upload,
        file_key: Some("uploads/2026/03/abc.wav".into()),
        content_hash: Some("abc123".into()),
        source_url: None,
        options: TaskOptions::default(),
        status: TaskStatus::Pending,
        progress: 0,
        duration_seconds: None,
        error_message: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        deleted_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_test_db;

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let pool = init_test_db().await.unwrap();
        let task = sample_task("u1");
        insert_task(&pool, &task).await.unwrap();

        let loaded = get_task(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, task.id);
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.file_key.as_deref(), Some("uploads/2026/03/abc.wav"));
    }

    #[tokio::test]
    async fn progress_never_moves_backwards() {
        let pool = init_test_db().await.unwrap();
        let task = sample_task("u1");
        insert_task(&pool, &task).await.unwrap();

        update_status_progress(&pool, task.id, TaskStatus::Transcribing, 45)
            .await
            .unwrap();
        update_status_progress(&pool, task.id, TaskStatus::Transcribing, 30)
            .await
            .unwrap();
        let loaded = get_task(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(loaded.progress, 45);
    }

    #[tokio::test]
    async fn terminal_status_is_final() {
        let pool = init_test_db().await.unwrap();
        let task = sample_task("u1");
        insert_task(&pool, &task).await.unwrap();

        mark_failed(&pool, task.id, "cancelled").await.unwrap();
        update_status_progress(&pool, task.id, TaskStatus::Summarizing, 80)
            .await
            .unwrap();
        let loaded = get_task(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Failed);
        assert_eq!(loaded.error_message.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn dedup_lookup_requires_completed_and_same_user() {
        let pool = init_test_db().await.unwrap();
        let task = sample_task("u1");
        insert_task(&pool, &task).await.unwrap();

        // Pending task does not dedup.
        assert!(find_completed_by_hash(&pool, "u1", "abc123")
            .await
            .unwrap()
            .is_none());

        mark_completed(&pool, task.id).await.unwrap();
        let hit = find_completed_by_hash(&pool, "u1", "abc123").await.unwrap();
        assert_eq!(hit.unwrap().id, task.id);

        // Another user's hash does not dedup.
        assert!(find_completed_by_hash(&pool, "u2", "abc123")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn list_filters_status_and_pages() {
        let pool = init_test_db().await.unwrap();
        for _ in 0..3 {
            insert_task(&pool, &sample_task("u1")).await.unwrap();
        }
        let extra = sample_task("u1");
        insert_task(&pool, &extra).await.unwrap();
        mark_completed(&pool, extra.id).await.unwrap();

        let (all, total) = list_tasks(&pool, "u1", None, 1, 10).await.unwrap();
        assert_eq!(total, 4);
        assert_eq!(all.len(), 4);

        let (done, done_total) = list_tasks(&pool, "u1", Some(TaskStatus::Completed), 1, 10)
            .await
            .unwrap();
        assert_eq!(done_total, 1);
        assert_eq!(done[0].id, extra.id);

        let (page2, _) = list_tasks(&pool, "u1", None, 2, 3).await.unwrap();
        assert_eq!(page2.len(), 1);
    }

    #[tokio::test]
    async fn soft_delete_hides_from_listing() {
        let pool = init_test_db().await.unwrap();
        let task = sample_task("u1");
        insert_task(&pool, &task).await.unwrap();

        assert!(soft_delete(&pool, task.id, "u1").await.unwrap());
        // Second delete is a no-op.
        assert!(!soft_delete(&pool, task.id, "u1").await.unwrap());

        let (tasks, total) = list_tasks(&pool, "u1", None, 1, 10).await.unwrap();
        assert_eq!(total, 0);
        assert!(tasks.is_empty());
        // Direct get still resolves (for audit), with the marker set.
        let loaded = get_task(&pool, task.id).await.unwrap().unwrap();
        assert!(loaded.deleted_at.is_some());
    }
}
