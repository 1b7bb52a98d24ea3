use std::sync::Arc;

use es_domain::config::Config;
use es_pipeline::cancel::CancelMap;
use es_pipeline::progress::ProgressBroadcaster;
use es_pipeline::PipelineContext;
use es_providers::breaker::BreakerMap;
use es_providers::cost::CostTracker;
use es_providers::health::HealthMonitor;
use es_providers::registry::ServiceRegistry;
use es_providers::retry::RetryPolicy;
use es_providers::selector::SmartSelector;
use es_store::DbPool;

/// Shared application state passed to all API handlers.
///
/// The same handles back the worker tier's [`PipelineContext`], so the API
/// and workers observe one registry, one breaker map, one progress bus.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: DbPool,

    // ── Provider stack ───────────────────────────────────────────────
    pub registry: Arc<ServiceRegistry>,
    pub selector: Arc<SmartSelector>,
    pub health: Arc<HealthMonitor>,
    pub breakers: Arc<BreakerMap>,
    pub cost: Arc<CostTracker>,

    // ── Pipeline plumbing ────────────────────────────────────────────
    pub progress: Arc<ProgressBroadcaster>,
    pub cancels: Arc<CancelMap>,
}

impl AppState {
    /// The worker tier's view of the same shared state.
    pub fn pipeline_context(&self) -> PipelineContext {
        PipelineContext {
            config: self.config.clone(),
            pool: self.pool.clone(),
            registry: self.registry.clone(),
            selector: self.selector.clone(),
            health: self.health.clone(),
            breakers: self.breakers.clone(),
            cost: self.cost.clone(),
            retry: RetryPolicy::from_config(&self.config.retry),
            progress: self.progress.clone(),
            cancels: self.cancels.clone(),
        }
    }
}
