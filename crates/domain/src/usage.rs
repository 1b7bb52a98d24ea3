use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::service::ServiceType;

/// Append-only record of one provider call's estimated cost.
///
/// `request_id` + `attempt` form the idempotency key: re-recording the same
/// attempt is a no-op at the durable sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub request_id: Uuid,
    pub attempt: u32,
    pub service_type: ServiceType,
    pub provider: String,
    pub model: Option<String>,
    pub user_id: Option<String>,
    pub task_id: Option<Uuid>,
    pub cost_usd: f64,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}
