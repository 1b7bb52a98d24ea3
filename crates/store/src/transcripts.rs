//! Transcript segment persistence.

use chrono::Utc;
use uuid::Uuid;

use es_domain::error::{Error, Result};
use es_domain::transcript::{NewSegment, TranscriptSegment, WordTiming};

use crate::{db_err, fmt_time, parse_time, DbPool};

#[derive(sqlx::FromRow)]
struct SegmentRow {
    id: i64,
    task_id: String,
    speaker_id: Option<String>,
    start_time: f64,
    end_time: f64,
    content: String,
    confidence: Option<f64>,
    words: Option<String>,
    is_edited: i64,
    original_content: Option<String>,
    created_at: String,
}

impl SegmentRow {
    fn into_segment(self) -> Result<TranscriptSegment> {
        let words: Option<Vec<WordTiming>> = match self.words {
            Some(ref json) => serde_json::from_str(json).ok(),
            None => None,
        };
        Ok(TranscriptSegment {
            id: self.id,
            task_id: Uuid::parse_str(&self.task_id).map_err(|e| Error::Database(e.to_string()))?,
            speaker_id: self.speaker_id,
            start_time: self.start_time,
            end_time: self.end_time,
            content: self.content,
            confidence: self.confidence,
            words,
            is_edited: self.is_edited != 0,
            original_content: self.original_content,
            created_at: parse_time(&self.created_at),
        })
    }
}

const COLS: &str = "id, task_id, speaker_id, start_time, end_time, content, confidence, words, \
     is_edited, original_content, created_at";

/// Replace the transcript for a task with a fresh set of segments.
///
/// A retried transcribe stage calls this again; replacing rather than
/// appending is what keeps the stage idempotent.
pub async fn replace_segments(pool: &DbPool, task_id: Uuid, segments: &[NewSegment]) -> Result<()> {
    let mut tx = pool.begin().await.map_err(db_err)?;

    sqlx::query("DELETE FROM transcript_segments WHERE task_id = ?")
        .bind(task_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

    let now = fmt_time(Utc::now());
    for seg in segments {
        let words_json = match &seg.words {
            Some(words) => Some(serde_json::to_string(words)?),
            None => None,
        };
        sqlx::query(
            "INSERT INTO transcript_segments \
             (task_id, speaker_id, start_time, end_time, content, confidence, words, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task_id.to_string())
        .bind(&seg.speaker_id)
        .bind(seg.start_time)
        .bind(seg.end_time)
        .bind(&seg.content)
        .bind(seg.confidence)
        .bind(words_json)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
    }

    tx.commit().await.map_err(db_err)?;
    Ok(())
}

/// Paged segments in time order.
pub async fn list_segments(
    pool: &DbPool,
    task_id: Uuid,
    page: u32,
    page_size: u32,
) -> Result<(Vec<TranscriptSegment>, i64)> {
    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transcript_segments WHERE task_id = ?")
        .bind(task_id.to_string())
        .fetch_one(pool)
        .await
        .map_err(db_err)?;

    let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);
    let rows: Vec<SegmentRow> = sqlx::query_as(&format!(
        "SELECT {COLS} FROM transcript_segments WHERE task_id = ? \
         ORDER BY start_time, id LIMIT ? OFFSET ?"
    ))
    .bind(task_id.to_string())
    .bind(i64::from(page_size))
    .bind(offset)
    .fetch_all(pool)
    .await
    .map_err(db_err)?;

    let segments = rows
        .into_iter()
        .map(SegmentRow::into_segment)
        .collect::<Result<Vec<_>>>()?;
    Ok((segments, total.0))
}

/// The full transcript, for summarization.
pub async fn all_segments(pool: &DbPool, task_id: Uuid) -> Result<Vec<TranscriptSegment>> {
    let rows: Vec<SegmentRow> = sqlx::query_as(&format!(
        "SELECT {COLS} FROM transcript_segments WHERE task_id = ? ORDER BY start_time, id"
    ))
    .bind(task_id.to_string())
    .fetch_all(pool)
    .await
    .map_err(db_err)?;
    rows.into_iter().map(SegmentRow::into_segment).collect()
}
