//! Per-provider circuit breakers.
//!
//! Each `(service_type, provider)` key owns a closed/open/half-open state
//! machine. N consecutive vendor failures open the circuit; after a cooldown
//! a single half-open probe is allowed through; a successful probe closes
//! the circuit, a failed one re-opens it with a doubled cooldown (capped).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use es_domain::config::BreakerConfig;
use es_domain::service::ServiceType;

use crate::health::HealthMonitor;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
struct BreakerEntry {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Current open-state cooldown; doubles on repeated failure.
    cooldown: Duration,
    /// Set while a half-open probe is in flight.
    probe_inflight: bool,
}

impl BreakerEntry {
    fn new(cooldown: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            cooldown,
            probe_inflight: false,
        }
    }
}

/// Snapshot of one breaker for observability endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub service_type: ServiceType,
    pub provider: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BreakerMap
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Keyed breaker store. All transitions happen under one lock; the hot
/// path is a single map lookup.
pub struct BreakerMap {
    config: BreakerConfig,
    entries: Mutex<HashMap<(ServiceType, String), BreakerEntry>>,
}

impl BreakerMap {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Current state, transitioning Open → HalfOpen when the cooldown has
    /// elapsed.
    pub fn state(&self, service_type: ServiceType, provider: &str) -> BreakerState {
        let mut entries = self.entries.lock();
        let entry = match entries.get_mut(&(service_type, provider.to_string())) {
            Some(e) => e,
            None => return BreakerState::Closed,
        };
        self.maybe_half_open(entry);
        entry.state
    }

    /// Whether a call may proceed. In half-open state only a single probe
    /// is admitted at a time.
    pub fn allow_request(&self, service_type: ServiceType, provider: &str) -> bool {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry((service_type, provider.to_string()))
            .or_insert_with(|| BreakerEntry::new(Duration::from_secs(self.config.cooldown_secs)));
        self.maybe_half_open(entry);
        match entry.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if entry.probe_inflight {
                    false
                } else {
                    entry.probe_inflight = true;
                    true
                }
            }
        }
    }

    /// Record a successful call. Half-open success closes the circuit and
    /// resets the cooldown.
    pub fn record_success(&self, service_type: ServiceType, provider: &str) -> BreakerState {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry((service_type, provider.to_string()))
            .or_insert_with(|| BreakerEntry::new(Duration::from_secs(self.config.cooldown_secs)));
        entry.consecutive_failures = 0;
        entry.probe_inflight = false;
        if entry.state != BreakerState::Closed {
            tracing::info!(
                service_type = %service_type,
                provider = %provider,
                "circuit closed after successful probe"
            );
        }
        entry.state = BreakerState::Closed;
        entry.opened_at = None;
        entry.cooldown = Duration::from_secs(self.config.cooldown_secs);
        entry.state
    }

    /// Record a vendor-side failure. Returns the state after the tally.
    pub fn record_failure(&self, service_type: ServiceType, provider: &str) -> BreakerState {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry((service_type, provider.to_string()))
            .or_insert_with(|| BreakerEntry::new(Duration::from_secs(self.config.cooldown_secs)));

        match entry.state {
            BreakerState::HalfOpen => {
                // Failed probe: re-open with a doubled cooldown.
                entry.probe_inflight = false;
                entry.cooldown = (entry.cooldown * 2)
                    .min(Duration::from_secs(self.config.max_cooldown_secs));
                entry.state = BreakerState::Open;
                entry.opened_at = Some(Instant::now());
                tracing::warn!(
                    service_type = %service_type,
                    provider = %provider,
                    cooldown_secs = entry.cooldown.as_secs(),
                    "half-open probe failed, circuit re-opened"
                );
            }
            BreakerState::Closed => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= self.config.failure_threshold {
                    entry.state = BreakerState::Open;
                    entry.opened_at = Some(Instant::now());
                    tracing::warn!(
                        service_type = %service_type,
                        provider = %provider,
                        failures = entry.consecutive_failures,
                        "circuit opened"
                    );
                }
            }
            BreakerState::Open => {
                entry.consecutive_failures += 1;
            }
        }
        entry.state
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut entries = self.entries.lock();
        let mut out: Vec<BreakerSnapshot> = entries
            .iter_mut()
            .map(|((st, name), e)| {
                self.maybe_half_open(e);
                BreakerSnapshot {
                    service_type: *st,
                    provider: name.clone(),
                    state: e.state,
                    consecutive_failures: e.consecutive_failures,
                }
            })
            .collect();
        out.sort_by(|a, b| {
            (a.service_type.as_str(), &a.provider).cmp(&(b.service_type.as_str(), &b.provider))
        });
        out
    }

    fn maybe_half_open(&self, entry: &mut BreakerEntry) {
        if entry.state == BreakerState::Open {
            if let Some(opened) = entry.opened_at {
                if opened.elapsed() >= entry.cooldown {
                    entry.state = BreakerState::HalfOpen;
                    entry.probe_inflight = false;
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome plumbing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Record one vendor call outcome against both the breaker and the health
/// monitor, propagating breaker transitions into the health score.
pub fn record_outcome(
    breakers: &BreakerMap,
    health: &HealthMonitor,
    service_type: ServiceType,
    provider: &str,
    ok: bool,
) {
    let state = if ok {
        health.record_success(service_type, provider);
        breakers.record_success(service_type, provider)
    } else {
        health.record_failure(service_type, provider);
        breakers.record_failure(service_type, provider)
    };
    health.on_breaker_change(service_type, provider, state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use es_domain::config::HealthConfig;

    fn map_with(threshold: u32, cooldown_secs: u64) -> BreakerMap {
        BreakerMap::new(BreakerConfig {
            failure_threshold: threshold,
            cooldown_secs,
            max_cooldown_secs: cooldown_secs * 8,
        })
    }

    #[test]
    fn fresh_provider_is_closed() {
        let m = map_with(5, 60);
        assert_eq!(m.state(ServiceType::Asr, "p"), BreakerState::Closed);
        assert!(m.allow_request(ServiceType::Asr, "p"));
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let m = map_with(5, 60);
        for _ in 0..4 {
            assert_eq!(
                m.record_failure(ServiceType::Asr, "p"),
                BreakerState::Closed
            );
        }
        assert_eq!(m.record_failure(ServiceType::Asr, "p"), BreakerState::Open);
        assert!(!m.allow_request(ServiceType::Asr, "p"));
    }

    #[test]
    fn success_resets_the_streak() {
        let m = map_with(3, 60);
        m.record_failure(ServiceType::Asr, "p");
        m.record_failure(ServiceType::Asr, "p");
        m.record_success(ServiceType::Asr, "p");
        m.record_failure(ServiceType::Asr, "p");
        m.record_failure(ServiceType::Asr, "p");
        assert_eq!(m.state(ServiceType::Asr, "p"), BreakerState::Closed);
    }

    #[test]
    fn half_open_after_cooldown_admits_single_probe() {
        let m = map_with(1, 0); // zero cooldown transitions immediately
        m.record_failure(ServiceType::Asr, "p");
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(m.state(ServiceType::Asr, "p"), BreakerState::HalfOpen);
        assert!(m.allow_request(ServiceType::Asr, "p"));
        // Second concurrent probe is rejected.
        assert!(!m.allow_request(ServiceType::Asr, "p"));
    }

    #[test]
    fn probe_success_closes_probe_failure_reopens_with_doubled_cooldown() {
        let m = map_with(1, 0);
        m.record_failure(ServiceType::Asr, "a");
        std::thread::sleep(Duration::from_millis(5));
        assert!(m.allow_request(ServiceType::Asr, "a"));
        assert_eq!(
            m.record_success(ServiceType::Asr, "a"),
            BreakerState::Closed
        );

        m.record_failure(ServiceType::Asr, "b");
        std::thread::sleep(Duration::from_millis(5));
        assert!(m.allow_request(ServiceType::Asr, "b"));
        assert_eq!(m.record_failure(ServiceType::Asr, "b"), BreakerState::Open);
    }

    #[test]
    fn record_outcome_feeds_health() {
        let m = map_with(1, 60);
        let h = HealthMonitor::new(HealthConfig::default());
        record_outcome(&m, &h, ServiceType::Asr, "p", false);
        // Breaker opened on the first failure (threshold 1) → health pinned to 0.
        assert_eq!(m.state(ServiceType::Asr, "p"), BreakerState::Open);
        assert_eq!(h.get(ServiceType::Asr, "p"), 0.0);
    }
}
