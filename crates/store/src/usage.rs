//! Durable usage log: the second half of the cost tracker's dual write.

use std::sync::Arc;

use uuid::Uuid;

use es_domain::error::{Error, Result};
use es_domain::service::ServiceType;
use es_domain::usage::UsageRecord;
use es_providers::cost::UsageSink;

use crate::{db_err, fmt_time, parse_time, DbPool};

/// Append one usage record. `INSERT OR IGNORE` makes re-recording the same
/// `(request_id, attempt)` a no-op.
pub async fn append_usage(pool: &DbPool, record: &UsageRecord) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO usage_records \
         (request_id, attempt, service_type, provider, model, user_id, task_id, \
          cost_usd, input_tokens, output_tokens, duration_seconds, recorded_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.request_id.to_string())
    .bind(i64::from(record.attempt))
    .bind(record.service_type.as_str())
    .bind(&record.provider)
    .bind(&record.model)
    .bind(&record.user_id)
    .bind(record.task_id.map(|t| t.to_string()))
    .bind(record.cost_usd)
    .bind(record.input_tokens)
    .bind(record.output_tokens)
    .bind(record.duration_seconds)
    .bind(fmt_time(record.recorded_at))
    .execute(pool)
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Total recorded cost for a user since `since` (RFC 3339), for attribution
/// queries.
pub async fn user_cost_since(pool: &DbPool, user_id: &str, since: &str) -> Result<f64> {
    let row: (f64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(cost_usd), 0.0) FROM usage_records \
         WHERE user_id = ? AND recorded_at >= ?",
    )
    .bind(user_id)
    .bind(since)
    .fetch_one(pool)
    .await
    .map_err(db_err)?;
    Ok(row.0)
}

/// Recent records for a provider, newest first.
pub async fn provider_records(
    pool: &DbPool,
    service_type: ServiceType,
    provider: &str,
    limit: u32,
) -> Result<Vec<UsageRecord>> {
    #[derive(sqlx::FromRow)]
    struct Row {
        request_id: String,
        attempt: i64,
        service_type: String,
        provider: String,
        model: Option<String>,
        user_id: Option<String>,
        task_id: Option<String>,
        cost_usd: f64,
        input_tokens: Option<i64>,
        output_tokens: Option<i64>,
        duration_seconds: Option<f64>,
        recorded_at: String,
    }

    let rows: Vec<Row> = sqlx::query_as(
        "SELECT request_id, attempt, service_type, provider, model, user_id, task_id, \
         cost_usd, input_tokens, output_tokens, duration_seconds, recorded_at \
         FROM usage_records WHERE service_type = ? AND provider = ? \
         ORDER BY recorded_at DESC LIMIT ?",
    )
    .bind(service_type.as_str())
    .bind(provider)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await
    .map_err(db_err)?;

    rows.into_iter()
        .map(|r| {
            Ok(UsageRecord {
                request_id: Uuid::parse_str(&r.request_id)
                    .map_err(|e| Error::Database(e.to_string()))?,
                attempt: r.attempt as u32,
                service_type: match r.service_type.as_str() {
                    "asr" => ServiceType::Asr,
                    "llm" => ServiceType::Llm,
                    _ => ServiceType::Storage,
                },
                provider: r.provider,
                model: r.model,
                user_id: r.user_id,
                task_id: r
                    .task_id
                    .as_deref()
                    .and_then(|t| Uuid::parse_str(t).ok()),
                cost_usd: r.cost_usd,
                input_tokens: r.input_tokens,
                output_tokens: r.output_tokens,
                duration_seconds: r.duration_seconds,
                recorded_at: parse_time(&r.recorded_at),
            })
        })
        .collect()
}

/// [`UsageSink`] backed by the `usage_records` table.
pub struct SqlUsageSink {
    pool: DbPool,
}

impl SqlUsageSink {
    pub fn new(pool: DbPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait::async_trait]
impl UsageSink for SqlUsageSink {
    async fn append(&self, record: &UsageRecord) -> Result<()> {
        append_usage(&self.pool, record).await
    }
}
