//! Smart provider selection.
//!
//! For each call the selector enumerates credentialed registrations whose
//! circuit is not open (and, for ASR, whose quota lane is available), scores
//! every candidate on health / cost / quota / free-tier, combines the scores
//! with the strategy's weight vector, and instantiates the winner. Ties
//! break deterministically on provider name.

use std::sync::Arc;

use serde::Serialize;

use es_domain::config::SelectionStrategy;
use es_domain::error::{Error, Result};
use es_domain::service::{AsrVariant, ServiceType};

use crate::breaker::{BreakerMap, BreakerState};
use crate::health::HealthMonitor;
use crate::registry::{InstantiateOverrides, Registration, ServiceRegistry};
use crate::traits::ServiceClient;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Quota gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the selector needs to know about one quota key.
#[derive(Debug, Clone, Copy)]
pub struct QuotaView {
    /// Every present entry for the resolved owner layer is inside its
    /// window and under its cap.
    pub available: bool,
    /// Score contribution in `[0,1]`; 0 when unavailable.
    pub remaining_fraction: f64,
    /// Unused free-tier fraction for the current period, `[0,1]`.
    pub free_remaining_fraction: f64,
}

/// Authoritative quota lookups. Implemented by the store crate; the
/// selector only depends on this seam.
#[async_trait::async_trait]
pub trait QuotaGate: Send + Sync {
    async fn view(
        &self,
        owner: &str,
        provider: &str,
        variant: AsrVariant,
        free_tier_seconds: i64,
    ) -> Result<QuotaView>;
}

/// Gate that never limits anything. Used when no quota store is wired.
pub struct UnlimitedQuota;

#[async_trait::async_trait]
impl QuotaGate for UnlimitedQuota {
    async fn view(
        &self,
        _owner: &str,
        _provider: &str,
        _variant: AsrVariant,
        free_tier_seconds: i64,
    ) -> Result<QuotaView> {
        Ok(QuotaView {
            available: true,
            remaining_fraction: 1.0,
            free_remaining_fraction: if free_tier_seconds > 0 { 1.0 } else { 0.0 },
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / result types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct SelectionRequest {
    pub owner: String,
    pub preferred_provider: Option<String>,
    pub model_id: Option<String>,
    pub strategy: Option<SelectionStrategy>,
    /// Pinned ASR quota lane; when `None` the selector prefers
    /// `file_fast` and falls back to `file`.
    pub variant: Option<AsrVariant>,
    /// Audio seconds for ASR cost estimation.
    pub duration_hint: Option<f64>,
    /// Input token count for LLM cost estimation.
    pub token_hint: Option<u32>,
}

/// Per-candidate score breakdown.
#[derive(Debug, Clone, Copy, Serialize, Default)]
pub struct ProviderScore {
    pub health: f64,
    pub cost: f64,
    pub quota: f64,
    pub free_quota: f64,
    pub total: f64,
}

/// A bound client plus the context the caller needs to commit quota and
/// record cost after the call.
#[derive(Debug)]
pub struct Selection {
    pub client: ServiceClient,
    pub provider: String,
    /// The quota lane this call charges (ASR only).
    pub variant: Option<AsrVariant>,
    pub score: ProviderScore,
}

/// Strategy weight vectors over (free_quota, health, cost, quota).
fn weights(strategy: SelectionStrategy) -> (f64, f64, f64, f64) {
    match strategy {
        SelectionStrategy::Balanced => (0.40, 0.25, 0.20, 0.15),
        SelectionStrategy::HealthFirst => (0.15, 0.55, 0.15, 0.15),
        SelectionStrategy::CostFirst => (0.25, 0.10, 0.55, 0.10),
        SelectionStrategy::PerformanceFirst => (0.15, 0.45, 0.10, 0.30),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SmartSelector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SmartSelector {
    registry: Arc<ServiceRegistry>,
    health: Arc<HealthMonitor>,
    breakers: Arc<BreakerMap>,
    quota: Arc<dyn QuotaGate>,
    default_strategy: SelectionStrategy,
}

struct Candidate<'a> {
    reg: &'a Registration,
    variant: Option<AsrVariant>,
    view: QuotaView,
    estimated_cost: f64,
    half_open: bool,
}

impl SmartSelector {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        health: Arc<HealthMonitor>,
        breakers: Arc<BreakerMap>,
        quota: Arc<dyn QuotaGate>,
        default_strategy: SelectionStrategy,
    ) -> Self {
        Self {
            registry,
            health,
            breakers,
            quota,
            default_strategy,
        }
    }

    /// Pick and instantiate one provider for a call.
    pub async fn select(
        &self,
        service_type: ServiceType,
        req: &SelectionRequest,
    ) -> Result<Selection> {
        if let Some(ref preferred) = req.preferred_provider {
            return self.select_preferred(service_type, preferred, req).await;
        }

        let strategy = req.strategy.unwrap_or(self.default_strategy);
        let registrations = self.registry.discover(service_type);
        if registrations.is_empty() {
            return Err(Error::NoProviderAvailable {
                service_type: service_type.to_string(),
                reason: "no credentialed providers registered".into(),
            });
        }

        let mut candidates: Vec<Candidate<'_>> = Vec::new();
        let mut quota_excluded = 0usize;

        for reg in registrations {
            let breaker_state = self.breakers.state(service_type, &reg.name);
            if breaker_state == BreakerState::Open {
                continue;
            }
            if service_type == ServiceType::Llm
                && reg.metadata.requires_model_id()
                && req.model_id.is_none()
            {
                tracing::debug!(
                    provider = %reg.name,
                    "skipping multi-model provider without model_id"
                );
                continue;
            }

            let (variant, view) = match service_type {
                ServiceType::Asr => match self.usable_lane(reg, req).await? {
                    Some(pair) => pair,
                    None => {
                        quota_excluded += 1;
                        continue;
                    }
                },
                _ => (
                    None,
                    QuotaView {
                        available: true,
                        remaining_fraction: 1.0,
                        free_remaining_fraction: 0.0,
                    },
                ),
            };

            let estimated_cost = estimate_cost(service_type, reg, req);
            candidates.push(Candidate {
                reg,
                variant,
                view,
                estimated_cost,
                half_open: breaker_state == BreakerState::HalfOpen,
            });
        }

        if candidates.is_empty() {
            if service_type == ServiceType::Asr && quota_excluded > 0 {
                return Err(Error::AllQuotasExhausted {
                    service_type: service_type.to_string(),
                });
            }
            return Err(Error::NoProviderAvailable {
                service_type: service_type.to_string(),
                reason: "all candidates are circuit-open or unusable".into(),
            });
        }

        let max_cost = candidates
            .iter()
            .map(|c| c.estimated_cost)
            .fold(0.0_f64, f64::max);

        let (w_free, w_health, w_cost, w_quota) = weights(strategy);
        let mut scored: Vec<(ProviderScore, &Candidate<'_>)> = candidates
            .iter()
            .map(|c| {
                let health = self.health.get(service_type, &c.reg.name);
                let cost = if max_cost <= 0.0 {
                    1.0
                } else {
                    (1.0 - c.estimated_cost / max_cost).max(0.0)
                };
                let quota = c.view.remaining_fraction;
                let free_quota = c.view.free_remaining_fraction;
                let total =
                    w_free * free_quota + w_health * health + w_cost * cost + w_quota * quota;
                (
                    ProviderScore {
                        health,
                        cost,
                        quota,
                        free_quota,
                        total,
                    },
                    c,
                )
            })
            .collect();

        scored.sort_by(|(sa, ca), (sb, cb)| {
            sb.total
                .partial_cmp(&sa.total)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ca.reg.name.cmp(&cb.reg.name))
        });

        for (score, winner) in &scored {
            // A half-open circuit admits exactly one probe; a busy probe
            // slot passes the turn to the next-best candidate.
            if winner.half_open
                && !self.breakers.allow_request(service_type, &winner.reg.name)
            {
                continue;
            }

            let client = self.registry.instantiate(
                service_type,
                &winner.reg.name,
                &InstantiateOverrides {
                    model_id: req.model_id.clone(),
                },
            )?;

            tracing::debug!(
                service_type = %service_type,
                provider = %winner.reg.name,
                total = score.total,
                health = score.health,
                cost = score.cost,
                quota = score.quota,
                free_quota = score.free_quota,
                "provider selected"
            );

            return Ok(Selection {
                client,
                provider: winner.reg.name.clone(),
                variant: winner.variant,
                score: *score,
            });
        }

        Err(Error::NoProviderAvailable {
            service_type: service_type.to_string(),
            reason: "all remaining candidates are mid-probe".into(),
        })
    }

    /// A pinned provider is used unconditionally when it passes the breaker
    /// and quota gates; otherwise selection fails rather than substitute.
    async fn select_preferred(
        &self,
        service_type: ServiceType,
        preferred: &str,
        req: &SelectionRequest,
    ) -> Result<Selection> {
        let reg = self
            .registry
            .get(service_type, preferred)
            .filter(|r| r.credentials_present())
            .ok_or_else(|| Error::PreferredUnavailable {
                provider: preferred.to_string(),
                reason: "not registered or credentials missing".into(),
            })?;

        if self.breakers.state(service_type, preferred) == BreakerState::Open {
            return Err(Error::PreferredUnavailable {
                provider: preferred.to_string(),
                reason: "circuit open".into(),
            });
        }

        let variant = if service_type == ServiceType::Asr {
            match self.usable_lane(reg, req).await? {
                Some((variant, _)) => variant,
                None => {
                    return Err(Error::PreferredUnavailable {
                        provider: preferred.to_string(),
                        reason: "quota exhausted".into(),
                    })
                }
            }
        } else {
            None
        };

        let client = self.registry.instantiate(
            service_type,
            preferred,
            &InstantiateOverrides {
                model_id: req.model_id.clone(),
            },
        )?;

        Ok(Selection {
            client,
            provider: preferred.to_string(),
            variant,
            score: ProviderScore::default(),
        })
    }

    /// Find the first quota lane this registration can serve: the pinned
    /// variant, or `file_fast` then `file`.
    async fn usable_lane(
        &self,
        reg: &Registration,
        req: &SelectionRequest,
    ) -> Result<Option<(Option<AsrVariant>, QuotaView)>> {
        let lanes: Vec<AsrVariant> = match req.variant {
            Some(v) => vec![v],
            None => AsrVariant::default_preference().to_vec(),
        };
        for lane in lanes {
            if !reg.metadata.variants.contains(&lane) {
                continue;
            }
            let view = self
                .quota
                .view(&req.owner, &reg.name, lane, reg.metadata.free_tier_seconds)
                .await?;
            if view.available {
                return Ok(Some((Some(lane), view)));
            }
        }
        Ok(None)
    }
}

/// Relative cost estimate in the service family's natural unit.
fn estimate_cost(service_type: ServiceType, reg: &Registration, req: &SelectionRequest) -> f64 {
    match service_type {
        ServiceType::Asr => {
            let minutes = req.duration_hint.unwrap_or(60.0) / 60.0;
            reg.metadata.cost_per_unit * minutes
        }
        ServiceType::Llm => {
            let tokens = f64::from(req.token_hint.unwrap_or(1000));
            reg.metadata.cost_per_unit * tokens / 1_000_000.0
        }
        ServiceType::Storage => reg.metadata.cost_per_unit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_weights_match_the_documented_vector() {
        let (free, health, cost, quota) = weights(SelectionStrategy::Balanced);
        assert_eq!((free, health, cost, quota), (0.40, 0.25, 0.20, 0.15));
    }

    #[test]
    fn every_strategy_weight_vector_sums_to_one() {
        for s in [
            SelectionStrategy::Balanced,
            SelectionStrategy::HealthFirst,
            SelectionStrategy::CostFirst,
            SelectionStrategy::PerformanceFirst,
        ] {
            let (a, b, c, d) = weights(s);
            assert!((a + b + c + d - 1.0).abs() < 1e-9, "{s:?}");
        }
    }
}
