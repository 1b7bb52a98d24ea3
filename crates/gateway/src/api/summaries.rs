//! Summary read and visualization-enqueue endpoints.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use es_domain::error::{Error, Result};
use es_domain::summary::SummaryType;
use es_domain::task::TaskStatus;
use es_store::queue::{enqueue, JobKind};
use es_store::summaries;

use crate::api::envelope::{fail, locale_from, ok};
use crate::api::tasks::owned_task;
use crate::api::user_of;
use crate::state::AppState;

/// `GET /v1/tasks/:id/summaries` — all active summaries, visual included.
pub async fn get_summaries(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    let locale = locale_from(&headers, &state.config.server.default_locale);
    match summaries_inner(&state, &user_of(&headers), id).await {
        Ok(data) => ok(&locale, data),
        Err(e) => fail(&locale, &e),
    }
}

async fn summaries_inner(state: &AppState, user_id: &str, id: Uuid) -> Result<serde_json::Value> {
    owned_task(state, user_id, id).await?;
    let rows = summaries::active_summaries(&state.pool, id).await?;
    Ok(json!({ "summaries": rows }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/tasks/:id/visualize
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct VisualizeRequest {
    pub visual_type: SummaryType,
    #[serde(default)]
    pub content_style: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub generate_image: bool,
    #[serde(default = "d_png")]
    pub image_format: String,
}

fn d_png() -> String {
    "png".into()
}

/// Enqueue a visualization pipeline for a completed task.
pub async fn generate_visualization(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<VisualizeRequest>,
) -> Response {
    let locale = locale_from(&headers, &state.config.server.default_locale);
    match visualize_inner(&state, &user_of(&headers), id, req).await {
        Ok(data) => ok(&locale, data),
        Err(e) => fail(&locale, &e),
    }
}

async fn visualize_inner(
    state: &AppState,
    user_id: &str,
    id: Uuid,
    req: VisualizeRequest,
) -> Result<serde_json::Value> {
    if !req.visual_type.is_visual() {
        return Err(Error::InvalidParam(format!(
            "{} is not a visual summary type",
            req.visual_type
        )));
    }
    if !matches!(req.image_format.as_str(), "png" | "svg") {
        return Err(Error::InvalidParam("image_format must be png or svg".into()));
    }

    let task = owned_task(state, user_id, id).await?;
    if task.status != TaskStatus::Completed {
        return Err(Error::Conflict(format!(
            "task {id} has no finished transcript yet"
        )));
    }

    let payload = json!({
        "visual_type": req.visual_type,
        "content_style": req.content_style,
        "provider": req.provider,
        "model_id": req.model_id,
        "generate_image": req.generate_image,
        "image_format": req.image_format,
    });
    let job_id = enqueue(&state.pool, id, JobKind::Visualize, Some(&payload)).await?;

    tracing::info!(task_id = %id, job_id, visual_type = %req.visual_type, "visualization enqueued");
    Ok(json!({ "enqueued": true, "job_id": job_id }))
}
