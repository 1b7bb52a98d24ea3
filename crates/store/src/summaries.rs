//! Summary persistence with versioning.
//!
//! Exactly one row per (task, summary_type) is active. Inserting a new
//! summary archives the previous active row and bumps the version. Inserts
//! dedupe on the stage attempt id, so a retried summarize stage that
//! already landed its row is a no-op.

use chrono::Utc;
use uuid::Uuid;

use es_domain::error::{Error, Result};
use es_domain::summary::{Summary, SummaryType};

use crate::{db_err, fmt_time, parse_time, DbPool};

/// Fields of a summary about to be persisted.
#[derive(Debug, Clone)]
pub struct NewSummary {
    pub task_id: Uuid,
    pub summary_type: SummaryType,
    pub content: String,
    pub visual_format: Option<String>,
    pub visual_content: Option<String>,
    pub image_key: Option<String>,
    pub model_used: Option<String>,
    pub prompt_version: Option<String>,
    pub token_count: Option<i64>,
    pub attempt_id: Uuid,
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    id: i64,
    task_id: String,
    summary_type: String,
    content: String,
    version: i64,
    is_active: i64,
    visual_format: Option<String>,
    visual_content: Option<String>,
    image_key: Option<String>,
    model_used: Option<String>,
    prompt_version: Option<String>,
    token_count: Option<i64>,
    created_at: String,
}

impl SummaryRow {
    fn into_summary(self) -> Result<Summary> {
        Ok(Summary {
            id: self.id,
            task_id: Uuid::parse_str(&self.task_id).map_err(|e| Error::Database(e.to_string()))?,
            summary_type: SummaryType::parse(&self.summary_type).ok_or_else(|| {
                Error::Database(format!("bad summary_type {}", self.summary_type))
            })?,
            content: self.content,
            version: self.version,
            is_active: self.is_active != 0,
            visual_format: self.visual_format,
            visual_content: self.visual_content,
            image_key: self.image_key,
            model_used: self.model_used,
            prompt_version: self.prompt_version,
            token_count: self.token_count,
            created_at: parse_time(&self.created_at),
        })
    }
}

const COLS: &str = "id, task_id, summary_type, content, version, is_active, visual_format, \
     visual_content, image_key, model_used, prompt_version, token_count, created_at";

/// Insert a summary, archiving the previous active version.
///
/// Returns the version number of the stored row. Re-inserting for the same
/// `(task, summary_type, attempt_id)` returns the existing version without
/// writing.
pub async fn insert_summary(pool: &DbPool, new: &NewSummary) -> Result<i64> {
    let mut tx = pool.begin().await.map_err(db_err)?;

    // Attempt-level idempotency.
    let existing: Option<(i64,)> = sqlx::query_as(
        "SELECT version FROM summaries \
         WHERE task_id = ? AND summary_type = ? AND attempt_id = ? AND is_active = 1",
    )
    .bind(new.task_id.to_string())
    .bind(new.summary_type.as_str())
    .bind(new.attempt_id.to_string())
    .fetch_optional(&mut *tx)
    .await
    .map_err(db_err)?;
    if let Some((version,)) = existing {
        tx.commit().await.map_err(db_err)?;
        return Ok(version);
    }

    let prev: Option<(i64,)> = sqlx::query_as(
        "SELECT version FROM summaries \
         WHERE task_id = ? AND summary_type = ? AND is_active = 1",
    )
    .bind(new.task_id.to_string())
    .bind(new.summary_type.as_str())
    .fetch_optional(&mut *tx)
    .await
    .map_err(db_err)?;
    let version = prev.map_or(1, |(v,)| v + 1);

    sqlx::query(
        "UPDATE summaries SET is_active = 0 \
         WHERE task_id = ? AND summary_type = ? AND is_active = 1",
    )
    .bind(new.task_id.to_string())
    .bind(new.summary_type.as_str())
    .execute(&mut *tx)
    .await
    .map_err(db_err)?;

    sqlx::query(
        "INSERT INTO summaries (task_id, summary_type, content, version, is_active, \
         visual_format, visual_content, image_key, model_used, prompt_version, token_count, \
         attempt_id, created_at) \
         VALUES (?, ?, ?, ?, 1, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(new.task_id.to_string())
    .bind(new.summary_type.as_str())
    .bind(&new.content)
    .bind(version)
    .bind(&new.visual_format)
    .bind(&new.visual_content)
    .bind(&new.image_key)
    .bind(&new.model_used)
    .bind(&new.prompt_version)
    .bind(new.token_count)
    .bind(new.attempt_id.to_string())
    .bind(fmt_time(Utc::now()))
    .execute(&mut *tx)
    .await
    .map_err(db_err)?;

    tx.commit().await.map_err(db_err)?;
    Ok(version)
}

/// All active summaries for a task.
pub async fn active_summaries(pool: &DbPool, task_id: Uuid) -> Result<Vec<Summary>> {
    let rows: Vec<SummaryRow> = sqlx::query_as(&format!(
        "SELECT {COLS} FROM summaries WHERE task_id = ? AND is_active = 1 ORDER BY summary_type"
    ))
    .bind(task_id.to_string())
    .fetch_all(pool)
    .await
    .map_err(db_err)?;
    rows.into_iter().map(SummaryRow::into_summary).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{insert_task, sample_task};
    use crate::init_test_db;

    fn new_summary(task_id: Uuid, attempt_id: Uuid, content: &str) -> NewSummary {
        NewSummary {
            task_id,
            summary_type: SummaryType::Overview,
            content: content.to_string(),
            visual_format: None,
            visual_content: None,
            image_key: None,
            model_used: Some("gpt-4o-mini".into()),
            prompt_version: Some("v1".into()),
            token_count: Some(420),
            attempt_id,
        }
    }

    #[tokio::test]
    async fn regeneration_archives_and_bumps_version() {
        let pool = init_test_db().await.unwrap();
        let task = sample_task("u1");
        insert_task(&pool, &task).await.unwrap();

        let v1 = insert_summary(&pool, &new_summary(task.id, Uuid::new_v4(), "first"))
            .await
            .unwrap();
        let v2 = insert_summary(&pool, &new_summary(task.id, Uuid::new_v4(), "second"))
            .await
            .unwrap();
        assert_eq!((v1, v2), (1, 2));

        // Exactly one active row per (task, type).
        let active = active_summaries(&pool, task.id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].content, "second");
        assert_eq!(active[0].version, 2);

        let rows: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM summaries WHERE task_id = ?")
                .bind(task.id.to_string())
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(rows.0, 2);
    }

    #[tokio::test]
    async fn same_attempt_does_not_double_insert() {
        let pool = init_test_db().await.unwrap();
        let task = sample_task("u1");
        insert_task(&pool, &task).await.unwrap();

        let attempt = Uuid::new_v4();
        let v1 = insert_summary(&pool, &new_summary(task.id, attempt, "once"))
            .await
            .unwrap();
        let v2 = insert_summary(&pool, &new_summary(task.id, attempt, "once"))
            .await
            .unwrap();
        assert_eq!(v1, v2);

        let active = active_summaries(&pool, task.id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].version, 1);
    }

    #[tokio::test]
    async fn visual_summary_round_trips_diagram_fields() {
        let pool = init_test_db().await.unwrap();
        let task = sample_task("u1");
        insert_task(&pool, &task).await.unwrap();

        let mut new = new_summary(task.id, Uuid::new_v4(), "diagram");
        new.summary_type = SummaryType::VisualMindmap;
        new.visual_format = Some("mermaid".into());
        new.visual_content = Some("mindmap\n  root((Topic))".into());
        insert_summary(&pool, &new).await.unwrap();

        let active = active_summaries(&pool, task.id).await.unwrap();
        assert_eq!(active[0].visual_format.as_deref(), Some("mermaid"));
        assert!(active[0].visual_content.as_deref().unwrap().starts_with("mindmap"));
        assert!(active[0].image_key.is_none());
    }
}
