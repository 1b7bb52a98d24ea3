//! Integration tests for the selection stack: registry + health + breakers
//! + quota gate wired the way the gateway wires them.

use std::collections::HashMap;
use std::sync::Arc;

use es_domain::config::{BreakerConfig, HealthConfig, SelectionStrategy};
use es_domain::error::{Error, Result};
use es_domain::service::{AsrVariant, ServiceType};
use es_providers::breaker::BreakerMap;
use es_providers::health::HealthMonitor;
use es_providers::registry::{
    InstantiateOverrides, ProviderMetadata, Registration, ServiceRegistry,
};
use es_providers::selector::{
    QuotaGate, QuotaView, SelectionRequest, SmartSelector, UnlimitedQuota,
};
use es_providers::traits::{AsrProvider, AsrRequest, AsrResponse, ServiceClient};
use parking_lot::Mutex;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fixtures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct FakeAsr(String);

#[async_trait::async_trait]
impl AsrProvider for FakeAsr {
    async fn transcribe(&self, _req: AsrRequest) -> Result<AsrResponse> {
        Ok(AsrResponse {
            segments: vec![],
            duration_seconds: 120.0,
            language: None,
        })
    }

    fn provider_name(&self) -> &str {
        &self.0
    }
}

fn asr_reg(name: &str, cost_per_minute: f64, free_tier_seconds: i64) -> Registration {
    let owned = name.to_string();
    Registration {
        service_type: ServiceType::Asr,
        name: name.to_string(),
        metadata: ProviderMetadata {
            display_name: name.to_string(),
            cost_per_unit: cost_per_minute,
            supports_streaming: false,
            variants: vec![AsrVariant::File, AsrVariant::FileFast],
            models: vec![],
            default_model: None,
            free_tier_seconds,
        },
        credential_envs: vec![],
        factory: Box::new(move |_: &InstantiateOverrides| {
            Ok(ServiceClient::Asr(Arc::new(FakeAsr(owned.clone()))))
        }),
    }
}

/// Quota gate scripted per (provider, variant).
#[derive(Default)]
struct ScriptedQuota {
    views: Mutex<HashMap<(String, String), QuotaView>>,
}

impl ScriptedQuota {
    fn set(&self, provider: &str, variant: AsrVariant, view: QuotaView) {
        self.views
            .lock()
            .insert((provider.to_string(), variant.as_str().to_string()), view);
    }
}

#[async_trait::async_trait]
impl QuotaGate for ScriptedQuota {
    async fn view(
        &self,
        _owner: &str,
        provider: &str,
        variant: AsrVariant,
        free_tier_seconds: i64,
    ) -> Result<QuotaView> {
        Ok(self
            .views
            .lock()
            .get(&(provider.to_string(), variant.as_str().to_string()))
            .copied()
            .unwrap_or(QuotaView {
                available: true,
                remaining_fraction: 1.0,
                free_remaining_fraction: if free_tier_seconds > 0 { 1.0 } else { 0.0 },
            }))
    }
}

struct Harness {
    selector: SmartSelector,
    breakers: Arc<BreakerMap>,
    health: Arc<HealthMonitor>,
    quota: Arc<ScriptedQuota>,
}

fn harness(regs: Vec<Registration>) -> Harness {
    let mut registry = ServiceRegistry::new();
    for r in regs {
        registry.register(r).unwrap();
    }
    let registry = Arc::new(registry);
    let health = Arc::new(HealthMonitor::new(HealthConfig::default()));
    let breakers = Arc::new(BreakerMap::new(BreakerConfig {
        failure_threshold: 5,
        cooldown_secs: 60,
        max_cooldown_secs: 600,
    }));
    let quota = Arc::new(ScriptedQuota::default());
    let selector = SmartSelector::new(
        registry,
        health.clone(),
        breakers.clone(),
        quota.clone(),
        SelectionStrategy::Balanced,
    );
    Harness {
        selector,
        breakers,
        health,
        quota,
    }
}

fn exhausted() -> QuotaView {
    QuotaView {
        available: false,
        remaining_fraction: 0.0,
        free_remaining_fraction: 0.0,
    }
}

fn asr_request() -> SelectionRequest {
    SelectionRequest {
        owner: "user-1".into(),
        duration_hint: Some(120.0),
        ..Default::default()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn exhausted_provider_fails_over_to_the_active_one() {
    let h = harness(vec![asr_reg("alpha", 0.006, 0), asr_reg("beta", 0.006, 0)]);
    // Alpha is exhausted on both lanes.
    h.quota.set("alpha", AsrVariant::FileFast, exhausted());
    h.quota.set("alpha", AsrVariant::File, exhausted());

    let sel = h
        .selector
        .select(ServiceType::Asr, &asr_request())
        .await
        .unwrap();
    assert_eq!(sel.provider, "beta");
    assert_eq!(sel.variant, Some(AsrVariant::FileFast));
}

#[tokio::test]
async fn open_circuit_is_never_selected() {
    let h = harness(vec![asr_reg("alpha", 0.006, 0), asr_reg("beta", 0.006, 0)]);
    for _ in 0..5 {
        h.breakers.record_failure(ServiceType::Asr, "alpha");
    }
    for _ in 0..20 {
        let sel = h
            .selector
            .select(ServiceType::Asr, &asr_request())
            .await
            .unwrap();
        assert_eq!(sel.provider, "beta");
    }
}

#[tokio::test]
async fn all_lanes_exhausted_reports_all_quotas_exhausted() {
    let h = harness(vec![asr_reg("alpha", 0.006, 0)]);
    h.quota.set("alpha", AsrVariant::FileFast, exhausted());
    h.quota.set("alpha", AsrVariant::File, exhausted());

    let err = h
        .selector
        .select(ServiceType::Asr, &asr_request())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AllQuotasExhausted { .. }));
    assert_eq!(err.code(), 40911);
}

#[tokio::test]
async fn everything_open_reports_no_provider_available() {
    let h = harness(vec![asr_reg("alpha", 0.006, 0)]);
    for _ in 0..5 {
        h.breakers.record_failure(ServiceType::Asr, "alpha");
    }
    let err = h
        .selector
        .select(ServiceType::Asr, &asr_request())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoProviderAvailable { .. }));
}

#[tokio::test]
async fn preferred_provider_is_not_silently_substituted() {
    let h = harness(vec![asr_reg("alpha", 0.006, 0), asr_reg("beta", 0.006, 0)]);
    h.quota.set("alpha", AsrVariant::FileFast, exhausted());
    h.quota.set("alpha", AsrVariant::File, exhausted());

    let mut req = asr_request();
    req.preferred_provider = Some("alpha".into());
    let err = h.selector.select(ServiceType::Asr, &req).await.unwrap_err();
    assert!(
        matches!(err, Error::PreferredUnavailable { ref provider, .. } if provider == "alpha")
    );
}

#[tokio::test]
async fn preferred_provider_wins_regardless_of_score() {
    let h = harness(vec![
        asr_reg("cheap", 0.001, 1000), // would win on score
        asr_reg("pricey", 0.1, 0),
    ]);
    h.health.record_failure(ServiceType::Asr, "pricey");

    let mut req = asr_request();
    req.preferred_provider = Some("pricey".into());
    let sel = h.selector.select(ServiceType::Asr, &req).await.unwrap();
    assert_eq!(sel.provider, "pricey");
}

#[tokio::test]
async fn healthier_provider_wins_under_health_first() {
    let h = harness(vec![asr_reg("alpha", 0.006, 0), asr_reg("beta", 0.006, 0)]);
    h.health.record_failure(ServiceType::Asr, "alpha");
    h.health.record_failure(ServiceType::Asr, "alpha");

    let mut req = asr_request();
    req.strategy = Some(SelectionStrategy::HealthFirst);
    let sel = h.selector.select(ServiceType::Asr, &req).await.unwrap();
    assert_eq!(sel.provider, "beta");
}

#[tokio::test]
async fn cheaper_provider_wins_under_cost_first() {
    let h = harness(vec![asr_reg("pricey", 0.1, 0), asr_reg("zcheap", 0.001, 0)]);
    let mut req = asr_request();
    req.strategy = Some(SelectionStrategy::CostFirst);
    let sel = h.selector.select(ServiceType::Asr, &req).await.unwrap();
    assert_eq!(sel.provider, "zcheap");
}

#[tokio::test]
async fn free_tier_dominates_balanced_selection() {
    let h = harness(vec![asr_reg("paid", 0.006, 0), asr_reg("zfree", 0.006, 3600)]);
    let sel = h
        .selector
        .select(ServiceType::Asr, &asr_request())
        .await
        .unwrap();
    assert_eq!(sel.provider, "zfree");
}

#[tokio::test]
async fn ties_break_on_provider_name_ascending() {
    let h = harness(vec![asr_reg("bravo", 0.006, 0), asr_reg("alpha", 0.006, 0)]);
    for _ in 0..10 {
        let sel = h
            .selector
            .select(ServiceType::Asr, &asr_request())
            .await
            .unwrap();
        assert_eq!(sel.provider, "alpha");
    }
}

#[tokio::test]
async fn pinned_variant_skips_provider_without_that_lane_quota() {
    let h = harness(vec![asr_reg("alpha", 0.006, 0), asr_reg("beta", 0.006, 0)]);
    h.quota.set("alpha", AsrVariant::File, exhausted());

    let mut req = asr_request();
    req.variant = Some(AsrVariant::File);
    let sel = h.selector.select(ServiceType::Asr, &req).await.unwrap();
    assert_eq!(sel.provider, "beta");
    assert_eq!(sel.variant, Some(AsrVariant::File));
}

#[tokio::test]
async fn fast_lane_exhaustion_falls_back_to_file_lane() {
    let h = harness(vec![asr_reg("alpha", 0.006, 0)]);
    h.quota.set("alpha", AsrVariant::FileFast, exhausted());

    let sel = h
        .selector
        .select(ServiceType::Asr, &asr_request())
        .await
        .unwrap();
    assert_eq!(sel.variant, Some(AsrVariant::File));
}

#[tokio::test]
async fn half_open_circuit_admits_one_probe_then_recovers() {
    let mut registry = ServiceRegistry::new();
    registry.register(asr_reg("alpha", 0.006, 0)).unwrap();
    let health = Arc::new(HealthMonitor::new(HealthConfig::default()));
    let breakers = Arc::new(BreakerMap::new(BreakerConfig {
        failure_threshold: 1,
        cooldown_secs: 0,
        max_cooldown_secs: 600,
    }));
    let selector = SmartSelector::new(
        Arc::new(registry),
        health.clone(),
        breakers.clone(),
        Arc::new(UnlimitedQuota),
        SelectionStrategy::Balanced,
    );

    breakers.record_failure(ServiceType::Asr, "alpha");
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    // The cooled-down circuit is half-open: the first selection takes the
    // probe slot, a concurrent second selection finds no one.
    let probe = selector.select(ServiceType::Asr, &asr_request()).await.unwrap();
    assert_eq!(probe.provider, "alpha");
    let err = selector
        .select(ServiceType::Asr, &asr_request())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoProviderAvailable { .. }));

    // A successful probe closes the circuit; selection flows again.
    es_providers::breaker::record_outcome(
        &breakers,
        &health,
        ServiceType::Asr,
        "alpha",
        true,
    );
    let sel = selector.select(ServiceType::Asr, &asr_request()).await.unwrap();
    assert_eq!(sel.provider, "alpha");
}

#[tokio::test]
async fn unlimited_quota_gate_always_admits() {
    let mut registry = ServiceRegistry::new();
    registry.register(asr_reg("only", 0.006, 0)).unwrap();
    let selector = SmartSelector::new(
        Arc::new(registry),
        Arc::new(HealthMonitor::new(HealthConfig::default())),
        Arc::new(BreakerMap::new(BreakerConfig {
            failure_threshold: 5,
            cooldown_secs: 60,
            max_cooldown_secs: 600,
        })),
        Arc::new(UnlimitedQuota),
        SelectionStrategy::Balanced,
    );
    let sel = selector
        .select(ServiceType::Asr, &asr_request())
        .await
        .unwrap();
    assert_eq!(sel.provider, "only");
    assert!(sel.client.as_asr().is_some());
}
