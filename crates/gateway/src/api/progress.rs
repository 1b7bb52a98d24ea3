//! SSE progress stream.
//!
//! Subscribes to the task's broadcast channel, replays the latest snapshot
//! first, then forwards live events in publish order. The stream closes
//! after one terminal (`completed` / `error`) event.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_core::Stream;
use serde_json::json;
use uuid::Uuid;

use es_domain::progress::ProgressEvent;

use crate::api::envelope::{fail, locale_from, message_for};
use crate::api::tasks::owned_task;
use crate::api::user_of;
use crate::state::AppState;

/// `GET /v1/tasks/:id/events`
pub async fn stream_progress(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    let locale = locale_from(&headers, &state.config.server.default_locale);
    if let Err(e) = owned_task(&state, &user_of(&headers), id).await {
        return fail(&locale, &e);
    }

    let (snapshot, receiver) = state.progress.subscribe(id);
    Sse::new(event_stream(snapshot, receiver, locale))
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Wrap a progress event in the standard envelope, as an SSE frame.
fn frame(event: &ProgressEvent, locale: &str) -> Event {
    let body = json!({
        "code": 0,
        "message": message_for(0, locale),
        "data": event,
        "traceId": Uuid::new_v4().to_string(),
    });
    Event::default().data(body.to_string())
}

fn event_stream(
    snapshot: Option<ProgressEvent>,
    mut receiver: tokio::sync::broadcast::Receiver<ProgressEvent>,
    locale: String,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        if let Some(ref event) = snapshot {
            yield Ok(frame(event, &locale));
            if event.is_terminal() {
                return;
            }
        }

        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    yield Ok(frame(&event, &locale));
                    if terminal {
                        return;
                    }
                }
                // Lagged: skip ahead; delivery is at-most-once.
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}
