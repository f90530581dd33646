//! Structured trace events for the job and chat supervisors. These sit
//! alongside ordinary `tracing` calls; they exist for the handful of
//! lifecycle transitions a log-shipping consumer wants to key off of
//! reliably (stage advances, restart reconciliation, run outcomes)
//! rather than scraping free-text log messages.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    JobCreated {
        job_id: String,
        input_type: String,
        filename: String,
    },
    StageAdvanced {
        job_id: String,
        stage: String,
        progress: f64,
        reason: String,
    },
    JobFinished {
        job_id: String,
        status: String,
    },
    JobCancelled {
        job_id: String,
    },
    RestartReconciled {
        kind: &'static str,
        id: String,
    },
    ChatSessionCreated {
        session_id: String,
        job_id: String,
    },
    ChatRunStarted {
        session_id: String,
        run_id: String,
    },
    ChatRunFinished {
        session_id: String,
        run_id: String,
        status: String,
    },
    StoreSaveFailed {
        entity: &'static str,
        id: String,
        error: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "pageindex_event");
    }
}
