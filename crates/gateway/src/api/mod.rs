pub mod envelope;
pub mod progress;
pub mod providers;
pub mod quota;
pub mod summaries;
pub mod tasks;
pub mod transcripts;

use axum::http::HeaderMap;
use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::state::AppState;

/// The calling user's identity. Authentication itself is handled upstream
/// (reverse proxy / JWT middleware); the verified subject arrives in
/// `X-User-Id`.
pub(crate) fn user_of(headers: &HeaderMap) -> String {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("local")
        .to_string()
}

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        // Health probe
        .route("/v1/health", get(providers::health_check))
        // Uploads
        .route("/v1/uploads/presign", post(tasks::presign_upload))
        // Tasks
        .route("/v1/tasks", post(tasks::create_task))
        .route("/v1/tasks", get(tasks::list_tasks))
        .route("/v1/tasks/:id", get(tasks::get_task))
        .route("/v1/tasks/:id", delete(tasks::delete_task))
        // Results
        .route("/v1/tasks/:id/transcript", get(transcripts::get_transcript))
        .route("/v1/tasks/:id/summaries", get(summaries::get_summaries))
        .route("/v1/tasks/:id/visualize", post(summaries::generate_visualization))
        // Progress stream
        .route("/v1/tasks/:id/events", get(progress::stream_progress))
        // Quotas
        .route("/v1/quotas", get(quota::query_quotas))
        .route("/v1/quotas", put(quota::refresh_quota))
        // Provider observability
        .route("/v1/providers", get(providers::list_providers))
}
