//! Task lifecycle endpoints: presigned/instant upload, create, list, get,
//! delete.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use es_domain::error::{Error, Result};
use es_domain::service::ServiceType;
use es_domain::task::{SourceType, Task, TaskOptions, TaskStatus};
use es_providers::selector::SelectionRequest;
use es_store::queue::{enqueue, JobKind};
use es_store::{stages, tasks};

use crate::api::envelope::{fail, locale_from, ok};
use crate::api::user_of;
use crate::state::AppState;

const PRESIGN_TTL: Duration = Duration::from_secs(300);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/uploads/presign
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct PresignRequest {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub content_hash: String,
}

pub async fn presign_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PresignRequest>,
) -> Response {
    let locale = locale_from(&headers, &state.config.server.default_locale);
    match presign_inner(&state, &user_of(&headers), req).await {
        Ok(data) => ok(&locale, data),
        Err(e) => fail(&locale, &e),
    }
}

async fn presign_inner(
    state: &AppState,
    user_id: &str,
    req: PresignRequest,
) -> Result<serde_json::Value> {
    if req.content_hash.len() != 64 || !req.content_hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidParam("content_hash must be hex sha-256".into()));
    }
    let limit = state.config.pipeline.download_limit_mb * 1024 * 1024;
    if req.size_bytes == 0 || req.size_bytes > limit {
        return Err(Error::InvalidParam(format!(
            "size_bytes must be in (0, {limit}]"
        )));
    }

    // Instant upload: this user already completed a task with these bytes.
    if let Some(existing) =
        tasks::find_completed_by_hash(&state.pool, user_id, &req.content_hash).await?
    {
        return Ok(json!({ "exists": true, "task_id": existing.id }));
    }

    let ext = std::path::Path::new(&req.filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    let now = Utc::now();
    let file_key = format!(
        "uploads/{}/{:02}/{}.{ext}",
        now.format("%Y"),
        chrono::Datelike::month(&now),
        req.content_hash
    );

    let selection = state
        .selector
        .select(
            ServiceType::Storage,
            &SelectionRequest {
                owner: user_id.to_string(),
                ..Default::default()
            },
        )
        .await?;
    let store = selection
        .client
        .as_storage()
        .ok_or_else(|| Error::Other("selector returned a non-storage client".into()))?;
    let upload_url = store
        .presign_put(&file_key, PRESIGN_TTL, &req.content_type)
        .await?;

    Ok(json!({
        "exists": false,
        "upload_url": upload_url,
        "file_key": file_key,
        "expires_in": PRESIGN_TTL.as_secs(),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub title: Option<String>,
    pub source_type: SourceType,
    #[serde(default)]
    pub file_key: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub options: TaskOptions,
}

pub async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateTaskRequest>,
) -> Response {
    let locale = locale_from(&headers, &state.config.server.default_locale);
    match create_inner(&state, &user_of(&headers), req).await {
        Ok(data) => ok(&locale, data),
        Err(e) => fail(&locale, &e),
    }
}

async fn create_inner(
    state: &AppState,
    user_id: &str,
    req: CreateTaskRequest,
) -> Result<serde_json::Value> {
    match req.source_type {
        SourceType::Upload if req.file_key.is_none() => {
            return Err(Error::InvalidParam("upload tasks require file_key".into()));
        }
        SourceType::Url => {
            let url = req
                .source_url
                .as_deref()
                .ok_or_else(|| Error::InvalidParam("url tasks require source_url".into()))?;
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::InvalidParam("source_url must be http(s)".into()));
            }
        }
        _ => {}
    }
    if let Some(ref lang) = req.options.language {
        if !matches!(lang.as_str(), "auto" | "zh" | "en") {
            return Err(Error::InvalidParam(format!("unsupported language '{lang}'")));
        }
    }

    let now = Utc::now();
    let task = Task {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        title: req.title,
        source_type: req.source_type,
        file_key: req.file_key,
        content_hash: req.content_hash,
        source_url: req.source_url,
        options: req.options,
        status: TaskStatus::Pending,
        progress: 0,
        duration_seconds: None,
        error_message: None,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };
    tasks::insert_task(&state.pool, &task).await?;
    enqueue(&state.pool, task.id, JobKind::Pipeline, None).await?;

    tracing::info!(task_id = %task.id, user_id, source_type = %task.source_type.as_str(), "task created");
    Ok(json!({ "id": task.id, "status": task.status, "progress": 0 }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "d_page")]
    pub page: u32,
    #[serde(default = "d_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub status: Option<String>,
}

fn d_page() -> u32 {
    1
}
fn d_page_size() -> u32 {
    20
}

#[derive(Debug, Serialize)]
struct TaskPage {
    items: Vec<Task>,
    total: i64,
    page: u32,
    page_size: u32,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    let locale = locale_from(&headers, &state.config.server.default_locale);
    match list_inner(&state, &user_of(&headers), query).await {
        Ok(data) => ok(&locale, data),
        Err(e) => fail(&locale, &e),
    }
}

async fn list_inner(state: &AppState, user_id: &str, query: ListQuery) -> Result<TaskPage> {
    if query.page == 0 {
        return Err(Error::InvalidParam("page starts at 1".into()));
    }
    if query.page_size == 0 || query.page_size > 100 {
        return Err(Error::InvalidParam("page_size must be in [1, 100]".into()));
    }
    let status = match query.status.as_deref() {
        None => None,
        Some(s) => Some(
            TaskStatus::parse(s)
                .ok_or_else(|| Error::InvalidParam(format!("unknown status '{s}'")))?,
        ),
    };

    let (items, total) =
        tasks::list_tasks(&state.pool, user_id, status, query.page, query.page_size).await?;
    Ok(TaskPage {
        items,
        total,
        page: query.page,
        page_size: query.page_size,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/tasks/:id • DELETE /v1/tasks/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Load a task and enforce ownership.
pub(crate) async fn owned_task(state: &AppState, user_id: &str, id: Uuid) -> Result<Task> {
    let task = tasks::get_task(&state.pool, id)
        .await?
        .filter(|t| t.deleted_at.is_none())
        .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
    if task.user_id != user_id {
        return Err(Error::PermissionDenied(format!("task {id}")));
    }
    Ok(task)
}

pub async fn get_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    let locale = locale_from(&headers, &state.config.server.default_locale);
    match get_inner(&state, &user_of(&headers), id).await {
        Ok(data) => ok(&locale, data),
        Err(e) => fail(&locale, &e),
    }
}

async fn get_inner(state: &AppState, user_id: &str, id: Uuid) -> Result<serde_json::Value> {
    let task = owned_task(state, user_id, id).await?;
    let stage_rows = stages::active_stages(&state.pool, id).await?;
    Ok(json!({ "task": task, "stages": stage_rows }))
}

pub async fn delete_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    let locale = locale_from(&headers, &state.config.server.default_locale);
    match delete_inner(&state, &user_of(&headers), id).await {
        Ok(data) => ok(&locale, data),
        Err(e) => fail(&locale, &e),
    }
}

async fn delete_inner(state: &AppState, user_id: &str, id: Uuid) -> Result<serde_json::Value> {
    owned_task(state, user_id, id).await?;

    // Stop a running pipeline first; its stages observe the flag at the
    // next checkpoint.
    state.cancels.cancel(id);
    tasks::soft_delete(&state.pool, id, user_id).await?;
    state.progress.forget(id);

    tracing::info!(task_id = %id, user_id, "task deleted");
    Ok(json!({ "deleted": true }))
}
