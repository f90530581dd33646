//! HTTP/SSE Adapter — a thin protocol surface translating
//! REST requests into supervisor calls and broker subscriptions into SSE
//! event streams. No business logic lives here: every handler either
//! forwards to `JobSupervisor`/`ChatSupervisor` or reads straight from the
//! store on disk (the `/result` endpoint).

pub mod chat;
pub mod jobs;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;

use pageindex_domain::error::Error as DomainError;

use crate::state::AppState;

/// Wraps [`pageindex_domain::error::Error`] so this crate can implement
/// `IntoResponse` for it (the error type and the trait both live outside
/// this crate, so a local newtype is required to satisfy the orphan
/// rule). Maps each error kind to its HTTP status.
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            DomainError::NotFound(_) => StatusCode::NOT_FOUND,
            DomainError::Validation(_) => StatusCode::BAD_REQUEST,
            DomainError::Conflict(_) => StatusCode::CONFLICT,
            DomainError::ExternalFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DomainError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DomainError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DomainError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DomainError::Provider { .. } => StatusCode::BAD_GATEWAY,
        };
        let body = json!({ "error": self.0.to_string(), "kind": self.0.kind() });
        (status, Json(body)).into_response()
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Build the full API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route("/api/jobs/:id", get(jobs::get_job))
        .route("/api/jobs/:id/events", get(jobs::job_events))
        .route("/api/jobs/:id/cancel", post(jobs::cancel_job))
        .route("/api/jobs/:id/result", get(jobs::job_result))
        .route(
            "/api/jobs/:id/chat/sessions",
            post(chat::create_session).get(chat::list_sessions).delete(chat::clear_sessions),
        )
        .route("/api/chat/sessions/:sid", get(chat::get_session).delete(chat::delete_session))
        .route("/api/chat/sessions/:sid/messages", post(chat::start_message_run))
        .route("/api/chat/sessions/:sid/runs/:rid/events", get(chat::run_events))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
