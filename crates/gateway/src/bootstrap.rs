//! Startup wiring: build the provider registry from config, connect the
//! database, seed global quota defaults, and assemble the shared state.

use std::sync::Arc;
use std::time::Duration;

use es_domain::config::{AsrKind, Config, LlmKind, StorageKind};
use es_domain::error::{Error, Result};
use es_domain::quota::{WindowType, GLOBAL_OWNER};
use es_domain::service::{AsrVariant, ServiceType};
use es_pipeline::cancel::CancelMap;
use es_pipeline::progress::ProgressBroadcaster;
use es_providers::asr::{DeepgramProvider, WhisperApiProvider};
use es_providers::breaker::BreakerMap;
use es_providers::cost::CostTracker;
use es_providers::health::HealthMonitor;
use es_providers::llm::{AnthropicProvider, OpenAiCompatProvider};
use es_providers::registry::{ProviderMetadata, Registration, ServiceRegistry};
use es_providers::selector::SmartSelector;
use es_providers::storage::{LocalStore, S3Store};
use es_providers::traits::ServiceClient;
use es_store::quota::QuotaStore;
use es_store::usage::SqlUsageSink;
use es_store::{init_db, queue, DbPool};

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry population
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Register every configured provider. Declaring a provider is cheap;
/// whether it is *usable* is decided at discovery time by credential
/// presence.
pub fn build_registry(config: &Config) -> Result<ServiceRegistry> {
    let mut registry = ServiceRegistry::new();

    for cfg in &config.asr.providers {
        let variants: Vec<AsrVariant> = cfg
            .variants
            .iter()
            .filter_map(|v| AsrVariant::parse(v))
            .collect();
        if variants.is_empty() {
            return Err(Error::Config(format!(
                "asr provider {} declares no known variants",
                cfg.name
            )));
        }
        let metadata = ProviderMetadata {
            display_name: display_or(&cfg.display_name, &cfg.name),
            cost_per_unit: cfg.cost_per_minute,
            supports_streaming: false,
            variants,
            models: vec![],
            default_model: None,
            free_tier_seconds: cfg.free_tier_seconds,
        };
        let kind = cfg.kind;
        let provider_cfg = cfg.clone();
        registry.register(Registration {
            service_type: ServiceType::Asr,
            name: cfg.name.clone(),
            metadata,
            credential_envs: vec![cfg.key_env.clone()],
            factory: Box::new(move |_| {
                let client: ServiceClient = match kind {
                    AsrKind::WhisperApi => ServiceClient::Asr(Arc::new(
                        WhisperApiProvider::from_config(&provider_cfg)?,
                    )),
                    AsrKind::Deepgram => {
                        ServiceClient::Asr(Arc::new(DeepgramProvider::from_config(&provider_cfg)?))
                    }
                };
                Ok(client)
            }),
        })?;
    }

    for cfg in &config.llm.providers {
        let mut models: Vec<String> = cfg.models.keys().cloned().collect();
        models.sort();
        let cost_per_unit = cfg
            .default_model
            .as_ref()
            .or_else(|| models.first())
            .and_then(|m| cfg.models.get(m))
            .map_or(0.0, |p| p.input_per_1m);
        let metadata = ProviderMetadata {
            display_name: display_or(&cfg.display_name, &cfg.name),
            cost_per_unit,
            supports_streaming: cfg.supports_streaming,
            variants: vec![],
            models,
            default_model: cfg.default_model.clone(),
            free_tier_seconds: 0,
        };
        let kind = cfg.kind;
        let provider_cfg = cfg.clone();
        registry.register(Registration {
            service_type: ServiceType::Llm,
            name: cfg.name.clone(),
            metadata,
            credential_envs: vec![cfg.key_env.clone()],
            factory: Box::new(move |overrides| {
                let model = overrides.model_id.as_deref();
                let client: ServiceClient = match kind {
                    LlmKind::OpenaiCompat => ServiceClient::Llm(Arc::new(
                        OpenAiCompatProvider::from_config(&provider_cfg, model)?,
                    )),
                    LlmKind::Anthropic => ServiceClient::Llm(Arc::new(
                        AnthropicProvider::from_config(&provider_cfg, model)?,
                    )),
                };
                Ok(client)
            }),
        })?;
    }

    for cfg in &config.storage.providers {
        let metadata = ProviderMetadata {
            display_name: display_or(&cfg.display_name, &cfg.name),
            cost_per_unit: cfg.cost_per_gb,
            supports_streaming: false,
            variants: vec![],
            models: vec![],
            default_model: None,
            free_tier_seconds: 0,
        };
        let credential_envs = match cfg.kind {
            StorageKind::S3 => [&cfg.access_key_env, &cfg.secret_key_env]
                .into_iter()
                .flatten()
                .cloned()
                .collect(),
            // A local directory needs no credentials.
            StorageKind::Local => vec![],
        };
        let kind = cfg.kind;
        let provider_cfg = cfg.clone();
        registry.register(Registration {
            service_type: ServiceType::Storage,
            name: cfg.name.clone(),
            metadata,
            credential_envs,
            factory: Box::new(move |_| {
                let client: ServiceClient = match kind {
                    StorageKind::S3 => {
                        ServiceClient::Storage(Arc::new(S3Store::from_config(&provider_cfg)?))
                    }
                    StorageKind::Local => {
                        ServiceClient::Storage(Arc::new(LocalStore::from_config(&provider_cfg)?))
                    }
                };
                Ok(client)
            }),
        })?;
    }

    Ok(registry)
}

fn display_or(display: &str, name: &str) -> String {
    if display.is_empty() {
        name.to_string()
    } else {
        display.to_string()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connect the database, seed quota defaults, requeue orphaned jobs, and
/// build the shared application state.
pub async fn build_state(config: Arc<Config>) -> Result<AppState> {
    let pool = init_db(&config.database.path).await?;
    seed_quota_defaults(&pool, &config).await?;

    let requeued = queue::requeue_orphans(&pool).await?;
    if requeued > 0 {
        tracing::info!(requeued, "requeued jobs orphaned by a previous run");
    }

    let registry = Arc::new(build_registry(&config)?);
    let discovered: usize = [ServiceType::Asr, ServiceType::Llm, ServiceType::Storage]
        .iter()
        .map(|&st| registry.discover(st).len())
        .sum();
    tracing::info!(
        registered = registry.list().len(),
        credentialed = discovered,
        "provider registry ready"
    );

    let health = Arc::new(HealthMonitor::new(config.health.clone()));
    let breakers = Arc::new(BreakerMap::new(config.breaker.clone()));
    let cost = Arc::new(CostTracker::new(Some(SqlUsageSink::new(pool.clone()))));
    let selector = Arc::new(SmartSelector::new(
        registry.clone(),
        health.clone(),
        breakers.clone(),
        Arc::new(QuotaStore::new(pool.clone())),
        config.selector.strategy,
    ));

    Ok(AppState {
        config,
        pool,
        registry,
        selector,
        health,
        breakers,
        cost,
        progress: Arc::new(ProgressBroadcaster::new()),
        cancels: Arc::new(CancelMap::new()),
    })
}

/// Seed the `global` quota layer from config. Existing rows keep their
/// usage; only the caps are updated.
pub async fn seed_quota_defaults(pool: &DbPool, config: &Config) -> Result<()> {
    for default in &config.quota.defaults {
        let window_type = WindowType::parse(&default.window_type).ok_or_else(|| {
            Error::Config(format!(
                "quota default has unknown window_type '{}'",
                default.window_type
            ))
        })?;
        es_store::quota::refresh(
            pool,
            GLOBAL_OWNER,
            &default.provider,
            &default.variant,
            window_type,
            default.quota_seconds,
            None,
            false,
        )
        .await?;
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Active health probes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Spawn the optional probe loop: a reachability check per credentialed
/// vendor endpoint on the configured interval. Purely feeds the health
/// monitor; breakers only tally real call outcomes.
pub fn spawn_health_probes(state: &AppState) -> Option<tokio::task::JoinHandle<()>> {
    let interval_secs = state.config.health.probe_interval_secs;
    if interval_secs == 0 {
        return None;
    }

    let mut targets: Vec<(ServiceType, String, String)> = Vec::new();
    for cfg in &state.config.asr.providers {
        targets.push((ServiceType::Asr, cfg.name.clone(), cfg.base_url.clone()));
    }
    for cfg in &state.config.llm.providers {
        targets.push((ServiceType::Llm, cfg.name.clone(), cfg.base_url.clone()));
    }

    let health = state.health.clone();
    Some(tokio::spawn(async move {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("probe client");
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            for (service_type, name, base_url) in &targets {
                match client.head(base_url).send().await {
                    Ok(_) => health.record_success(*service_type, name),
                    Err(e) => {
                        tracing::debug!(provider = %name, error = %e, "health probe failed");
                        health.record_failure(*service_type, name);
                    }
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use es_domain::config::{AsrProviderConfig, LlmProviderConfig, ModelPricing};
    use es_providers::registry::InstantiateOverrides;

    fn config_with_providers() -> Config {
        let mut config = Config::default();
        config.asr.providers.push(AsrProviderConfig {
            name: "whisper".into(),
            kind: AsrKind::WhisperApi,
            base_url: "https://api.openai.com".into(),
            key_env: "ES_TEST_BOOTSTRAP_WHISPER_KEY".into(),
            display_name: String::new(),
            variants: vec!["file".into(), "file_fast".into()],
            cost_per_minute: 0.006,
            free_tier_seconds: 0,
            model: None,
        });
        let mut models = std::collections::HashMap::new();
        models.insert(
            "gpt-4o-mini".into(),
            ModelPricing {
                input_per_1m: 0.15,
                output_per_1m: 0.6,
            },
        );
        models.insert(
            "gpt-4o".into(),
            ModelPricing {
                input_per_1m: 2.5,
                output_per_1m: 10.0,
            },
        );
        config.llm.providers.push(LlmProviderConfig {
            name: "openai".into(),
            kind: LlmKind::OpenaiCompat,
            base_url: "https://api.openai.com".into(),
            key_env: "ES_TEST_BOOTSTRAP_OPENAI_KEY".into(),
            display_name: String::new(),
            models,
            default_model: Some("gpt-4o-mini".into()),
            supports_streaming: true,
        });
        config
    }

    #[test]
    fn registry_builds_and_discovery_tracks_credentials() {
        let registry = build_registry(&config_with_providers()).unwrap();
        assert_eq!(registry.list().len(), 2);

        // Nothing discovered without the env vars.
        assert!(registry.discover(ServiceType::Asr).is_empty());

        std::env::set_var("ES_TEST_BOOTSTRAP_WHISPER_KEY", "k");
        assert_eq!(registry.discover(ServiceType::Asr).len(), 1);
        std::env::remove_var("ES_TEST_BOOTSTRAP_WHISPER_KEY");
    }

    #[test]
    fn llm_instantiation_uses_declared_models() {
        std::env::set_var("ES_TEST_BOOTSTRAP_OPENAI_KEY", "k");
        let registry = build_registry(&config_with_providers()).unwrap();

        // Default model works; undeclared override is rejected.
        assert!(registry
            .instantiate(ServiceType::Llm, "openai", &InstantiateOverrides::default())
            .is_ok());
        assert!(registry
            .instantiate(
                ServiceType::Llm,
                "openai",
                &InstantiateOverrides {
                    model_id: Some("made-up".into())
                }
            )
            .is_err());
        std::env::remove_var("ES_TEST_BOOTSTRAP_OPENAI_KEY");
    }

    #[test]
    fn duplicate_provider_names_are_rejected() {
        let mut config = config_with_providers();
        let dup = config.asr.providers[0].clone();
        config.asr.providers.push(dup);
        assert!(build_registry(&config).is_err());
    }
}
