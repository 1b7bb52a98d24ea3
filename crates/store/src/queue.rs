//! Durable job queue between the API tier and the worker tier.
//!
//! Claims are single conditional `UPDATE ... RETURNING` statements, so a
//! queued job lands on exactly one worker even with several workers polling
//! the same database.

use chrono::Utc;
use uuid::Uuid;

use es_domain::error::{Error, Result};

use crate::{db_err, fmt_time, DbPool};

/// What kind of pipeline a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Pipeline,
    Visualize,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Pipeline => "pipeline",
            JobKind::Visualize => "visualize",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pipeline" => Some(Self::Pipeline),
            "visualize" => Some(Self::Visualize),
            _ => None,
        }
    }
}

/// A claimed job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub task_id: Uuid,
    pub kind: JobKind,
    /// Job-specific parameters (visualization type, style, …).
    pub payload: Option<serde_json::Value>,
}

/// Enqueue a job for a task.
pub async fn enqueue(
    pool: &DbPool,
    task_id: Uuid,
    kind: JobKind,
    payload: Option<&serde_json::Value>,
) -> Result<i64> {
    let payload_json = payload.map(serde_json::Value::to_string);
    let res = sqlx::query(
        "INSERT INTO job_queue (task_id, kind, payload, status, enqueued_at) \
         VALUES (?, ?, ?, 'queued', ?)",
    )
    .bind(task_id.to_string())
    .bind(kind.as_str())
    .bind(payload_json)
    .bind(fmt_time(Utc::now()))
    .execute(pool)
    .await
    .map_err(db_err)?;
    Ok(res.last_insert_rowid())
}

/// Claim the oldest queued job, if any.
pub async fn claim(pool: &DbPool) -> Result<Option<Job>> {
    #[derive(sqlx::FromRow)]
    struct Row {
        id: i64,
        task_id: String,
        kind: String,
        payload: Option<String>,
    }

    let row: Option<Row> = sqlx::query_as(
        "UPDATE job_queue SET status = 'running', claimed_at = ? \
         WHERE id = (SELECT id FROM job_queue WHERE status = 'queued' ORDER BY id LIMIT 1) \
         RETURNING id, task_id, kind, payload",
    )
    .bind(fmt_time(Utc::now()))
    .fetch_optional(pool)
    .await
    .map_err(db_err)?;

    row.map(|r| {
        Ok(Job {
            id: r.id,
            task_id: Uuid::parse_str(&r.task_id).map_err(|e| Error::Database(e.to_string()))?,
            kind: JobKind::parse(&r.kind)
                .ok_or_else(|| Error::Database(format!("bad job kind {}", r.kind)))?,
            payload: r
                .payload
                .as_deref()
                .and_then(|p| serde_json::from_str(p).ok()),
        })
    })
    .transpose()
}

/// Mark a claimed job finished.
pub async fn finish(pool: &DbPool, job_id: i64, ok: bool) -> Result<()> {
    sqlx::query("UPDATE job_queue SET status = ?, finished_at = ? WHERE id = ?")
        .bind(if ok { "done" } else { "failed" })
        .bind(fmt_time(Utc::now()))
        .bind(job_id)
        .execute(pool)
        .await
        .map_err(db_err)?;
    Ok(())
}

/// Re-queue jobs stuck in `running` (worker died mid-task). Stage
/// idempotency makes re-execution safe. Returns the number re-queued.
pub async fn requeue_orphans(pool: &DbPool) -> Result<u64> {
    let res = sqlx::query(
        "UPDATE job_queue SET status = 'queued', claimed_at = NULL WHERE status = 'running'",
    )
    .execute(pool)
    .await
    .map_err(db_err)?;
    Ok(res.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_test_db;

    #[tokio::test]
    async fn claim_hands_out_jobs_in_order_exactly_once() {
        let pool = init_test_db().await.unwrap();
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        enqueue(&pool, t1, JobKind::Pipeline, None).await.unwrap();
        enqueue(&pool, t2, JobKind::Pipeline, None).await.unwrap();

        let first = claim(&pool).await.unwrap().unwrap();
        let second = claim(&pool).await.unwrap().unwrap();
        assert_eq!(first.task_id, t1);
        assert_eq!(second.task_id, t2);
        assert!(claim(&pool).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn payload_round_trips() {
        let pool = init_test_db().await.unwrap();
        let payload = serde_json::json!({"visual_type": "visual_mindmap", "generate_image": false});
        enqueue(&pool, Uuid::new_v4(), JobKind::Visualize, Some(&payload))
            .await
            .unwrap();

        let job = claim(&pool).await.unwrap().unwrap();
        assert_eq!(job.kind, JobKind::Visualize);
        assert_eq!(job.payload.unwrap()["visual_type"], "visual_mindmap");
    }

    #[tokio::test]
    async fn orphaned_jobs_are_requeued() {
        let pool = init_test_db().await.unwrap();
        enqueue(&pool, Uuid::new_v4(), JobKind::Pipeline, None)
            .await
            .unwrap();
        let job = claim(&pool).await.unwrap().unwrap();
        assert!(claim(&pool).await.unwrap().is_none());

        // Simulated crash: the running job goes back to queued.
        assert_eq!(requeue_orphans(&pool).await.unwrap(), 1);
        let again = claim(&pool).await.unwrap().unwrap();
        assert_eq!(again.id, job.id);
    }

    #[tokio::test]
    async fn finished_jobs_stay_finished() {
        let pool = init_test_db().await.unwrap();
        enqueue(&pool, Uuid::new_v4(), JobKind::Pipeline, None)
            .await
            .unwrap();
        let job = claim(&pool).await.unwrap().unwrap();
        finish(&pool, job.id, true).await.unwrap();

        assert_eq!(requeue_orphans(&pool).await.unwrap(), 0);
        assert!(claim(&pool).await.unwrap().is_none());
    }
}
