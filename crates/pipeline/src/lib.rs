//! Pipeline execution: the orchestrator that drives a task through its
//! stages, the stage actions themselves, cancellation, progress broadcast,
//! transcript post-processing, and summary generation.

pub mod cancel;
pub mod orchestrator;
pub mod progress;
pub mod stages;
pub mod summarize;
pub mod templates;
pub mod transcript;
pub mod worker;

use std::sync::Arc;

use es_domain::config::Config;
use es_providers::breaker::BreakerMap;
use es_providers::cost::CostTracker;
use es_providers::health::HealthMonitor;
use es_providers::registry::ServiceRegistry;
use es_providers::retry::RetryPolicy;
use es_providers::selector::SmartSelector;
use es_store::DbPool;

use crate::cancel::CancelMap;
use crate::progress::ProgressBroadcaster;

/// Everything a worker needs to run pipelines. Cloned per worker; all
/// members are shared handles.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<Config>,
    pub pool: DbPool,
    pub registry: Arc<ServiceRegistry>,
    pub selector: Arc<SmartSelector>,
    pub health: Arc<HealthMonitor>,
    pub breakers: Arc<BreakerMap>,
    pub cost: Arc<CostTracker>,
    pub retry: RetryPolicy,
    pub progress: Arc<ProgressBroadcaster>,
    pub cancels: Arc<CancelMap>,
}
