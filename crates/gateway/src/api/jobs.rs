//! Job endpoints: upload intake, listing, detail, cancellation, SSE
//! progress, and result retrieval.

use std::time::Duration;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use bytes::Bytes;
use futures_util::stream::{self, Stream};
use serde_json::Value;

use pageindex_domain::error::Error as DomainError;
use pageindex_domain::job::{InputType, Job, JobOptions};

use crate::api::ApiError;
use crate::state::AppState;

pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<Job>> {
    Json(state.jobs.list())
}

pub async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.jobs.get(&id)?))
}

pub async fn cancel_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.jobs.cancel(&id).await?))
}

/// Returns the raw PageIndex tree JSON written by the indexer, read
/// straight off disk (no in-memory copy is kept once a job completes).
pub async fn job_result(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let job = state.jobs.get(&id)?;
    let path = job
        .result_file
        .as_deref()
        .ok_or_else(|| DomainError::not_found(format!("job {id} has no result file")))?;
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| DomainError::not_found(format!("result file {path} unreadable: {e}")))?;
    let value: Value = serde_json::from_slice(&bytes).map_err(DomainError::from)?;
    Ok(Json(value))
}

/// Multipart field names accepted alongside `file`: everything else maps
/// 1:1 onto `JobOptions`, mirroring the indexer command builder's flags.
pub async fn create_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let mut filename: Option<String> = None;
    let mut input_type: Option<InputType> = None;
    let mut file_bytes: Option<Bytes> = None;
    let mut options = JobOptions::default();

    while let Some(field) = multipart.next_field().await.map_err(|e| DomainError::validation(e.to_string()))? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                filename = field.file_name().map(|s| s.to_string());
                file_bytes = Some(field.bytes().await.map_err(|e| DomainError::validation(e.to_string()))?);
            }
            "input_type" => {
                let text = field.text().await.map_err(|e| DomainError::validation(e.to_string()))?;
                input_type = Some(match text.to_lowercase().as_str() {
                    "pdf" => InputType::Pdf,
                    "md" | "markdown" => InputType::Md,
                    other => return Err(DomainError::validation(format!("unknown input_type {other}")).into()),
                });
            }
            "model" => options.model = non_empty(field.text().await.ok()),
            "toc_check_pages" => options.toc_check_pages = parse_opt(field.text().await.ok()),
            "max_pages_per_node" => options.max_pages_per_node = parse_opt(field.text().await.ok()),
            "max_tokens_per_node" => options.max_tokens_per_node = parse_opt(field.text().await.ok()),
            "if_add_node_id" => options.if_add_node_id = parse_opt(field.text().await.ok()),
            "if_add_node_summary" => options.if_add_node_summary = parse_opt(field.text().await.ok()),
            "if_add_doc_description" => options.if_add_doc_description = parse_opt(field.text().await.ok()),
            "if_add_node_text" => options.if_add_node_text = parse_opt(field.text().await.ok()),
            "if_thinning" => options.if_thinning = parse_opt(field.text().await.ok()),
            "thinning_threshold" => options.thinning_threshold = parse_opt(field.text().await.ok()),
            "summary_token_threshold" => options.summary_token_threshold = parse_opt(field.text().await.ok()),
            _ => {
                let _ = field.bytes().await;
            }
        }
    }

    let filename = filename.ok_or_else(|| DomainError::validation("missing file field"))?;
    let input_type = input_type.ok_or_else(|| DomainError::validation("missing input_type field"))?;
    let bytes = file_bytes.ok_or_else(|| DomainError::validation("missing file contents"))?;

    // `JobSupervisor::create` streams its input; the multipart body is
    // already fully buffered by the time every field has been read, so a
    // single-item stream over the buffered bytes satisfies that
    // interface without a second buffering pass inside the supervisor.
    let body = stream::once(async move { Ok::<_, std::io::Error>(bytes) });
    let job = state.jobs.create(&filename, input_type, options, Box::pin(body)).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

fn parse_opt<T: std::str::FromStr>(text: Option<String>) -> Option<T> {
    non_empty(text).and_then(|t| t.parse().ok())
}

pub async fn job_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, ApiError> {
    let (handle, mut rx) = state.jobs.subscribe(&id)?;
    let jobs = state.jobs.clone();
    let keepalive = state.config.broker.sse_keepalive_secs;
    let job_id = id.clone();
    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok(Event::default().event(event.name()).data(event.payload().to_string()));
        }
        jobs.unsubscribe(&job_id, &handle);
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(keepalive))))
}
