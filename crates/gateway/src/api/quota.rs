//! Quota introspection and refresh endpoints.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use es_domain::error::{Error, Result};
use es_domain::quota::WindowType;
use es_store::quota;

use crate::api::envelope::{fail, locale_from, ok};
use crate::api::user_of;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QuotaQuery {
    /// Owner scope; defaults to the requesting user. `global` is the
    /// shared layer.
    #[serde(default)]
    pub owner: Option<String>,
}

/// `GET /v1/quotas` — all entries for an owner scope, rollover applied.
pub async fn query_quotas(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<QuotaQuery>,
) -> Response {
    let locale = locale_from(&headers, &state.config.server.default_locale);
    let owner = query.owner.unwrap_or_else(|| user_of(&headers));
    match quota::query_owner(&state.pool, &owner).await {
        Ok(entries) => ok(&locale, json!({ "owner": owner, "entries": entries })),
        Err(e) => fail(&locale, &e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PUT /v1/quotas
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub owner: Option<String>,
    pub provider: String,
    pub variant: String,
    pub window_type: String,
    #[serde(default)]
    pub quota_seconds: Option<i64>,
    #[serde(default)]
    pub quota_hours: Option<i64>,
    #[serde(default)]
    pub window_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub window_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reset: bool,
}

/// `PUT /v1/quotas` — create or update one entry.
pub async fn refresh_quota(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RefreshRequest>,
) -> Response {
    let locale = locale_from(&headers, &state.config.server.default_locale);
    match refresh_inner(&state, &user_of(&headers), req).await {
        Ok(data) => ok(&locale, data),
        Err(e) => fail(&locale, &e),
    }
}

async fn refresh_inner(
    state: &AppState,
    requester: &str,
    req: RefreshRequest,
) -> Result<serde_json::Value> {
    let window_type = WindowType::parse(&req.window_type)
        .ok_or_else(|| Error::InvalidParam(format!("unknown window_type '{}'", req.window_type)))?;

    let quota_seconds = match (req.quota_seconds, req.quota_hours) {
        (Some(s), None) => s,
        (None, Some(h)) => h * 3600,
        (Some(_), Some(_)) => {
            return Err(Error::InvalidParam(
                "give quota_seconds or quota_hours, not both".into(),
            ))
        }
        (None, None) => {
            return Err(Error::InvalidParam(
                "quota_seconds or quota_hours is required".into(),
            ))
        }
    };
    if quota_seconds <= 0 {
        return Err(Error::InvalidParam("quota must be positive".into()));
    }

    let window = match (req.window_start, req.window_end) {
        (Some(start), Some(end)) if start < end => Some((start, end)),
        (Some(_), Some(_)) => {
            return Err(Error::InvalidParam("window_start must precede window_end".into()))
        }
        (None, None) => None,
        _ => {
            return Err(Error::InvalidParam(
                "window_start and window_end come together".into(),
            ))
        }
    };

    let owner = req.owner.unwrap_or_else(|| requester.to_string());
    quota::refresh(
        &state.pool,
        &owner,
        &req.provider,
        &req.variant,
        window_type,
        quota_seconds,
        window,
        req.reset,
    )
    .await?;

    let entries = quota::entries_for_key(&state.pool, &owner, &req.provider, &req.variant).await?;
    tracing::info!(
        owner = %owner,
        provider = %req.provider,
        variant = %req.variant,
        window_type = %window_type,
        quota_seconds,
        reset = req.reset,
        "quota refreshed"
    );
    Ok(json!({ "entries": entries }))
}
