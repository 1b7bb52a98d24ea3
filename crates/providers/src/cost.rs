//! Cost accounting: a fast in-process day-keyed aggregate plus a durable
//! append-only sink.
//!
//! Every provider call emits a [`UsageRecord`]. The tracker dual-writes: the
//! hot aggregate answers "what has provider X cost today" without touching
//! the database, and the durable sink keeps the long-term, per-user log.
//! Sink failures are counted and logged, never swallowed into silence.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use es_domain::error::Result;
use es_domain::service::ServiceType;
use es_domain::usage::UsageRecord;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Durable sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Destination for the durable usage log. Implemented by the store crate;
/// appends must be idempotent over `(request_id, attempt)`.
#[async_trait::async_trait]
pub trait UsageSink: Send + Sync {
    async fn append(&self, record: &UsageRecord) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CostTracker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Clone, Copy)]
struct DayAggregate {
    cost_usd: f64,
    calls: u64,
}

/// Dual-write cost tracker.
pub struct CostTracker {
    /// (service_type, provider, date) → running aggregate.
    fast: RwLock<HashMap<(ServiceType, String, NaiveDate), DayAggregate>>,
    /// Idempotency guard for the in-process aggregate.
    seen: Mutex<HashSet<(Uuid, u32)>>,
    sink: Option<Arc<dyn UsageSink>>,
    sink_failures: AtomicU64,
}

impl CostTracker {
    pub fn new(sink: Option<Arc<dyn UsageSink>>) -> Self {
        Self {
            fast: RwLock::new(HashMap::new()),
            seen: Mutex::new(HashSet::new()),
            sink,
            sink_failures: AtomicU64::new(0),
        }
    }

    /// Record one provider call. Re-recording the same `(request_id,
    /// attempt)` is a no-op.
    pub async fn record(&self, record: UsageRecord) {
        {
            let mut seen = self.seen.lock();
            if !seen.insert((record.request_id, record.attempt)) {
                return;
            }
        }

        {
            let mut fast = self.fast.write();
            let agg = fast
                .entry((
                    record.service_type,
                    record.provider.clone(),
                    record.recorded_at.date_naive(),
                ))
                .or_default();
            agg.cost_usd += record.cost_usd;
            agg.calls += 1;
        }

        if let Some(ref sink) = self.sink {
            if let Err(e) = sink.append(&record).await {
                self.sink_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    provider = %record.provider,
                    request_id = %record.request_id,
                    error = %e,
                    "durable usage log write failed"
                );
            }
        }
    }

    /// Today's aggregate cost for a provider, from the fast index.
    pub fn cost_today(&self, service_type: ServiceType, provider: &str) -> f64 {
        let today = chrono::Utc::now().date_naive();
        self.fast
            .read()
            .get(&(service_type, provider.to_string(), today))
            .map(|a| a.cost_usd)
            .unwrap_or(0.0)
    }

    /// Today's call count for a provider.
    pub fn calls_today(&self, service_type: ServiceType, provider: &str) -> u64 {
        let today = chrono::Utc::now().date_naive();
        self.fast
            .read()
            .get(&(service_type, provider.to_string(), today))
            .map(|a| a.calls)
            .unwrap_or(0)
    }

    /// Number of durable-sink write failures since startup.
    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }
}
