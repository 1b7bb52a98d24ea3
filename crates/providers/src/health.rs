//! Rolling provider health scores.
//!
//! [`HealthMonitor`] keeps one score in `[0,1]` per `(service_type,
//! provider)`. Scores start at 1.0, decay multiplicatively on consecutive
//! failures, and recover additively on success. Breaker transitions feed
//! back in: an open breaker pins the score to zero, a half-open breaker
//! caps it.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;

use es_domain::config::HealthConfig;
use es_domain::service::ServiceType;

use crate::breaker::BreakerState;

/// Cap applied while a provider's breaker is half-open.
const HALF_OPEN_CAP: f64 = 0.5;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
struct HealthState {
    score: f64,
    consecutive_failures: u32,
    /// Upper bound imposed by breaker state, when any.
    cap: Option<f64>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            score: 1.0,
            consecutive_failures: 0,
            cap: None,
        }
    }
}

/// Snapshot of one provider's health for observability endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub service_type: ServiceType,
    pub provider: String,
    pub score: f64,
    pub consecutive_failures: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HealthMonitor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Thread-safe health score store (passive observation; active probing is
/// wired in the gateway when configured).
pub struct HealthMonitor {
    config: HealthConfig,
    states: RwLock<HashMap<(ServiceType, String), HealthState>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Current score for a provider. Unknown providers score 1.0.
    pub fn get(&self, service_type: ServiceType, provider: &str) -> f64 {
        let states = self.states.read();
        match states.get(&(service_type, provider.to_string())) {
            Some(s) => s.cap.map_or(s.score, |c| s.score.min(c)),
            None => 1.0,
        }
    }

    pub fn record_success(&self, service_type: ServiceType, provider: &str) {
        let mut states = self.states.write();
        let state = states
            .entry((service_type, provider.to_string()))
            .or_default();
        state.consecutive_failures = 0;
        state.score = (state.score + self.config.success_step).min(1.0);
    }

    pub fn record_failure(&self, service_type: ServiceType, provider: &str) {
        let mut states = self.states.write();
        let state = states
            .entry((service_type, provider.to_string()))
            .or_default();
        state.consecutive_failures += 1;
        state.score *= self.config.failure_decay;
        if state.score < 1e-6 {
            state.score = 0.0;
        }
        tracing::debug!(
            service_type = %service_type,
            provider = %provider,
            score = state.score,
            consecutive_failures = state.consecutive_failures,
            "provider health decayed"
        );
    }

    /// Apply breaker feedback: open pins the effective score to zero,
    /// half-open caps it, closed removes the cap.
    pub fn on_breaker_change(
        &self,
        service_type: ServiceType,
        provider: &str,
        breaker: BreakerState,
    ) {
        let mut states = self.states.write();
        let state = states
            .entry((service_type, provider.to_string()))
            .or_default();
        state.cap = match breaker {
            BreakerState::Open => Some(0.0),
            BreakerState::HalfOpen => Some(HALF_OPEN_CAP),
            BreakerState::Closed => None,
        };
    }

    /// All tracked providers, sorted, for the observability endpoint.
    pub fn snapshot(&self) -> Vec<HealthSnapshot> {
        let states = self.states.read();
        let mut out: Vec<HealthSnapshot> = states
            .iter()
            .map(|((st, name), s)| HealthSnapshot {
                service_type: *st,
                provider: name.clone(),
                score: s.cap.map_or(s.score, |c| s.score.min(c)),
                consecutive_failures: s.consecutive_failures,
            })
            .collect();
        out.sort_by(|a, b| {
            (a.service_type.as_str(), &a.provider).cmp(&(b.service_type.as_str(), &b.provider))
        });
        out
    }
}
