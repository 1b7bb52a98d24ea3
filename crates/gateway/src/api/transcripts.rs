//! Transcript read endpoint.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use es_domain::error::{Error, Result};
use es_store::transcripts;

use crate::api::envelope::{fail, locale_from, ok};
use crate::api::tasks::owned_task;
use crate::api::user_of;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TranscriptQuery {
    #[serde(default = "d_page")]
    pub page: u32,
    #[serde(default = "d_page_size")]
    pub page_size: u32,
}

fn d_page() -> u32 {
    1
}
fn d_page_size() -> u32 {
    50
}

/// `GET /v1/tasks/:id/transcript` — paged segments with speakers and
/// (when the vendor provided them) word-level timestamps.
pub async fn get_transcript(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Query(query): Query<TranscriptQuery>,
) -> Response {
    let locale = locale_from(&headers, &state.config.server.default_locale);
    match inner(&state, &user_of(&headers), id, query).await {
        Ok(data) => ok(&locale, data),
        Err(e) => fail(&locale, &e),
    }
}

async fn inner(
    state: &AppState,
    user_id: &str,
    id: Uuid,
    query: TranscriptQuery,
) -> Result<serde_json::Value> {
    if query.page == 0 || query.page_size == 0 || query.page_size > 100 {
        return Err(Error::InvalidParam("bad paging parameters".into()));
    }
    owned_task(state, user_id, id).await?;

    let (segments, total) =
        transcripts::list_segments(&state.pool, id, query.page, query.page_size).await?;

    let mut speakers: Vec<String> = segments
        .iter()
        .filter_map(|s| s.speaker_id.clone())
        .collect();
    speakers.sort();
    speakers.dedup();

    Ok(json!({
        "segments": segments,
        "speakers": speakers,
        "total": total,
        "page": query.page,
        "page_size": query.page_size,
    }))
}
