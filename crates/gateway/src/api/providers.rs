//! Provider observability: registry, health scores, breaker states.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use serde_json::json;

use crate::api::envelope::{locale_from, ok};
use crate::state::AppState;

/// `GET /v1/providers` — the registry with live health and breaker
/// snapshots, for dashboards and diagnosis.
pub async fn list_providers(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let locale = locale_from(&headers, &state.config.server.default_locale);

    let providers: Vec<serde_json::Value> = state
        .registry
        .list()
        .into_iter()
        .map(|reg| {
            json!({
                "service_type": reg.service_type,
                "name": reg.name,
                "display_name": reg.metadata.display_name,
                "credentialed": reg.credentials_present(),
                "cost_per_unit": reg.metadata.cost_per_unit,
                "supports_streaming": reg.metadata.supports_streaming,
                "variants": reg.metadata.variants,
                "models": reg.metadata.models,
                "free_tier_seconds": reg.metadata.free_tier_seconds,
                "health": state.health.get(reg.service_type, &reg.name),
            })
        })
        .collect();

    ok(
        &locale,
        json!({
            "providers": providers,
            "breakers": state.breakers.snapshot(),
            "health": state.health.snapshot(),
            "cost_sink_failures": state.cost.sink_failures(),
        }),
    )
}

/// `GET /v1/health` — liveness probe.
pub async fn health_check(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let locale = locale_from(&headers, &state.config.server.default_locale);
    ok(&locale, json!({ "status": "ok" }))
}
