//! Chat session and message-run endpoints, job-scoped creation/listing
//! plus top-level session access and the run-events SSE stream.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::json;

use pageindex_domain::chat::ChatSession;

use crate::api::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionBody {
    #[serde(default)]
    pub title: Option<String>,
}

/// Callers with nothing to configure may POST an empty JSON object
/// (`{}`); `title` is optional either way.
pub async fn create_session(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(body): Json<CreateSessionBody>,
) -> Result<(StatusCode, Json<ChatSession>), ApiError> {
    let session = state.chats.create_session(&job_id, body.title)?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn list_sessions(State(state): State<AppState>, Path(job_id): Path<String>) -> Json<Vec<ChatSession>> {
    Json(state.chats.list_sessions(&job_id))
}

pub async fn clear_sessions(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let count = state.chats.clear_sessions_for_job(&job_id)?;
    Ok(Json(json!({ "deleted_count": count })))
}

pub async fn get_session(State(state): State<AppState>, Path(sid): Path<String>) -> Result<Json<ChatSession>, ApiError> {
    Ok(Json(state.chats.get_session(&sid)?))
}

pub async fn delete_session(State(state): State<AppState>, Path(sid): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    state.chats.delete_session(&sid)?;
    Ok(Json(json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    pub content: String,
}

pub async fn start_message_run(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    Json(body): Json<SendMessageBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let (run_id, user_message_id, assistant_message_id) = state.chats.start_message_run(&sid, &body.content)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "run_id": run_id,
            "user_message_id": user_message_id,
            "assistant_message_id": assistant_message_id,
        })),
    ))
}

pub async fn run_events(
    State(state): State<AppState>,
    Path((sid, rid)): Path<(String, String)>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, ApiError> {
    // Existence check up front so a bad session id 404s rather than
    // hanging an SSE connection open against a topic nothing ever
    // publishes to.
    state.chats.get_session(&sid)?;
    let (handle, mut rx) = state.chats.subscribe(&sid, &rid);
    let chats = state.chats.clone();
    let keepalive = state.config.broker.sse_keepalive_secs;
    let (sid_owned, rid_owned) = (sid.clone(), rid.clone());
    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok(Event::default().event(event.name()).data(event.payload().to_string()));
        }
        chats.unsubscribe(&sid_owned, &rid_owned, &handle);
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(keepalive))))
}
