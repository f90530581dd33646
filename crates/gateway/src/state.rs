//! Shared application state handed to every axum handler.

use std::sync::Arc;

use pageindex_domain::config::Config;

use crate::store::Store;
use crate::supervisor::chat::ChatSupervisor;
use crate::supervisor::job::JobSupervisor;

#[derive(Clone)]
pub struct AppState {
    // ── Configuration ───────────────────────────────────────────────
    pub config: Arc<Config>,

    // ── Persistence ─────────────────────────────────────────────────
    pub store: Arc<Store>,

    // ── Supervisors ─────────────────────────────────────────────────
    pub jobs: Arc<JobSupervisor>,
    pub chats: Arc<ChatSupervisor>,
}
