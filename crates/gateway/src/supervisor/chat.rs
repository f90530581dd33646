//! Chat Supervisor — owns chat sessions anchored to completed
//! jobs and serialises runs per session (at most one `RUNNING` run at a
//! time). The run pipeline holds the session lock only around in-memory
//! mutation and persistence; the lock is released while calling out to
//! the LLM provider for retrieval and streaming generation, so one
//! session's LLM call never stalls another session.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use pageindex_domain::chat::{ChatMessage, ChatRole, ChatRun, ChatSession, NodeCitation, RunStatus};
use pageindex_domain::config::Config;
use pageindex_domain::error::{Error, Result};
use pageindex_domain::job::JobStatus;
use pageindex_domain::llm::LlmProvider;

use crate::broker::Broker;
use crate::ids;
use crate::store::Store;
use crate::supervisor::job::JobSupervisor;
use crate::supervisor::retrieval;

#[derive(Debug, Clone)]
pub enum ChatEvent {
    RunStarted { run_id: String, user_message_id: String, assistant_message_id: String, created_at: DateTime<Utc> },
    RetrievalCompleted { run_id: String, thinking: String, node_ids: Vec<String>, citations: Vec<NodeCitation> },
    AnswerDelta { run_id: String, delta: String },
    AnswerCompleted { run_id: String, citations: Vec<NodeCitation> },
    RunCompleted { run_id: String },
    RunFailed { run_id: String, error: String },
}

impl ChatEvent {
    pub fn run_id(&self) -> &str {
        match self {
            ChatEvent::RunStarted { run_id, .. }
            | ChatEvent::RetrievalCompleted { run_id, .. }
            | ChatEvent::AnswerDelta { run_id, .. }
            | ChatEvent::AnswerCompleted { run_id, .. }
            | ChatEvent::RunCompleted { run_id }
            | ChatEvent::RunFailed { run_id, .. } => run_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::RunStarted { .. } => "chat.run.started",
            ChatEvent::RetrievalCompleted { .. } => "chat.retrieval.completed",
            ChatEvent::AnswerDelta { .. } => "chat.answer.delta",
            ChatEvent::AnswerCompleted { .. } => "chat.answer.completed",
            ChatEvent::RunCompleted { .. } => "chat.run.completed",
            ChatEvent::RunFailed { .. } => "chat.run.failed",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            ChatEvent::RunStarted { run_id, user_message_id, assistant_message_id, created_at } => serde_json::json!({
                "run_id": run_id,
                "user_message_id": user_message_id,
                "assistant_message_id": assistant_message_id,
                "created_at": created_at,
            }),
            ChatEvent::RetrievalCompleted { run_id, thinking, node_ids, citations } => serde_json::json!({
                "run_id": run_id,
                "thinking": thinking,
                "node_ids": node_ids,
                "citations": citations,
            }),
            ChatEvent::AnswerDelta { run_id, delta } => serde_json::json!({ "run_id": run_id, "delta": delta }),
            ChatEvent::AnswerCompleted { run_id, citations } => serde_json::json!({ "run_id": run_id, "citations": citations }),
            ChatEvent::RunCompleted { run_id } => serde_json::json!({ "run_id": run_id }),
            ChatEvent::RunFailed { run_id, error } => serde_json::json!({ "run_id": run_id, "error": error }),
        }
    }
}

pub struct ChatSupervisor {
    store: Arc<Store>,
    config: Arc<Config>,
    jobs: Arc<JobSupervisor>,
    llm: Arc<dyn LlmProvider>,
    broker: Broker<(String, String), ChatEvent>,
    sessions: Mutex<HashMap<String, ChatSession>>,
}

impl ChatSupervisor {
    /// Load persisted sessions and reconcile restart state: any session
    /// left with an active run is forced to `FAILED`, mirroring the job
    /// supervisor's restart reconciliation.
    pub fn new(store: Arc<Store>, config: Arc<Config>, jobs: Arc<JobSupervisor>, llm: Arc<dyn LlmProvider>) -> Result<Arc<Self>> {
        let mut sessions = store.chats.load_all::<ChatSession>()?;
        for session in sessions.values_mut() {
            if let Some(run_id) = session.active_run_id.clone() {
                if let Some(run) = session.run_mut(&run_id) {
                    run.status = RunStatus::Failed;
                    run.error = Some("Backend restarted while chat run was active".to_string());
                    run.updated_at = Utc::now();
                }
                session.active_run_id = None;
                session.active_run_status = None;
                session.updated_at = Utc::now();
                store.chats.save(&session.id, session)?;
                pageindex_domain::trace::TraceEvent::RestartReconciled { kind: "chat_session", id: session.id.clone() }.emit();
            }
        }
        let chat_queue_capacity = config.broker.chat_queue_capacity;
        Ok(Arc::new(Self {
            store,
            config,
            jobs,
            llm,
            broker: Broker::new(chat_queue_capacity),
            sessions: Mutex::new(sessions),
        }))
    }

    pub fn get_session(&self, session_id: &str) -> Result<ChatSession> {
        self.sessions
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("chat session {session_id}")))
    }

    pub fn list_sessions(&self, job_id: &str) -> Vec<ChatSession> {
        let mut sessions: Vec<ChatSession> =
            self.sessions.lock().values().filter(|s| s.job_id == job_id).cloned().collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    pub fn create_session(&self, job_id: &str, title: Option<String>) -> Result<ChatSession> {
        let job = self.jobs.get(job_id)?;
        if job.status != JobStatus::Completed {
            return Err(Error::validation(format!("job {job_id} is not completed")));
        }
        let result_file = job.result_file.as_deref().ok_or_else(|| Error::not_found("job has no result file"))?;
        if !Path::new(result_file).exists() {
            return Err(Error::not_found(format!("result file {result_file} is missing")));
        }

        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Document Chat".to_string());
        let id = ids::session_id();
        let session = ChatSession::new(id.clone(), job_id.to_string(), title);
        self.store.chats.save(&id, &session)?;
        self.sessions.lock().insert(id.clone(), session.clone());
        pageindex_domain::trace::TraceEvent::ChatSessionCreated { session_id: id, job_id: job_id.to_string() }.emit();
        Ok(session)
    }

    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get(session_id).ok_or_else(|| Error::not_found(format!("chat session {session_id}")))?;
        if session.has_running_run() {
            return Err(Error::conflict("a run is active for this session"));
        }
        sessions.remove(session_id);
        drop(sessions);
        self.store.chats.delete(session_id)?;
        Ok(())
    }

    /// Delete every session for `job_id`. Refuses (leaving all sessions
    /// untouched) if any of them has an active run.
    pub fn clear_sessions_for_job(&self, job_id: &str) -> Result<usize> {
        let mut sessions = self.sessions.lock();
        let ids: Vec<String> = sessions.values().filter(|s| s.job_id == job_id).map(|s| s.id.clone()).collect();
        if ids.iter().any(|id| sessions.get(id).map(|s| s.has_running_run()).unwrap_or(false)) {
            return Err(Error::conflict("a run is active for one of this job's sessions"));
        }
        for id in &ids {
            sessions.remove(id);
        }
        drop(sessions);
        for id in &ids {
            self.store.chats.delete(id)?;
        }
        Ok(ids.len())
    }

    pub fn subscribe(&self, session_id: &str, run_id: &str) -> (crate::broker::SubscriberHandle, crate::broker::Subscription<ChatEvent>) {
        self.broker.subscribe((session_id.to_string(), run_id.to_string()))
    }

    pub fn unsubscribe(&self, session_id: &str, run_id: &str, handle: &crate::broker::SubscriberHandle) {
        self.broker.unsubscribe(&(session_id.to_string(), run_id.to_string()), handle);
    }

    /// Append a user turn, reserve the assistant turn and a `RUNNING` run,
    /// and spawn the run pipeline in the background. Returns the new ids
    /// immediately; the pipeline streams its progress over `subscribe`.
    pub fn start_message_run(
        self: &Arc<Self>,
        session_id: &str,
        content: &str,
    ) -> Result<(String, String, String)> {
        let content = content.trim();
        if content.is_empty() {
            return Err(Error::validation("message content must not be empty"));
        }

        let (run_id, user_message_id, assistant_message_id) = {
            let mut sessions = self.sessions.lock();
            let session =
                sessions.get_mut(session_id).ok_or_else(|| Error::not_found(format!("chat session {session_id}")))?;
            if session.active_run_id.is_some() {
                return Err(Error::conflict("a run is already active for this session"));
            }
            let job = self.jobs.get(&session.job_id)?;
            if job.status != JobStatus::Completed {
                return Err(Error::validation("job is no longer completed"));
            }

            let now = Utc::now();
            let user_message = ChatMessage { id: ids::message_id(), role: ChatRole::User, content: content.to_string(), created_at: now, citations: vec![] };
            let assistant_message = ChatMessage { id: ids::message_id(), role: ChatRole::Assistant, content: String::new(), created_at: now, citations: vec![] };
            let run = ChatRun {
                id: ids::run_id(),
                status: RunStatus::Running,
                user_message_id: user_message.id.clone(),
                assistant_message_id: assistant_message.id.clone(),
                created_at: now,
                updated_at: now,
                retrieval_thinking: None,
                selected_node_ids: vec![],
                error: None,
            };
            let run_id = run.id.clone();
            let user_message_id = user_message.id.clone();
            let assistant_message_id = assistant_message.id.clone();

            session.push_message(user_message);
            session.push_message(assistant_message);
            session.runs.push(run);
            session.active_run_id = Some(run_id.clone());
            session.active_run_status = Some(RunStatus::Running);
            self.store.chats.save(session_id, session)?;
            self.broker.publish(
                &(session_id.to_string(), run_id.clone()),
                ChatEvent::RunStarted {
                    run_id: run_id.clone(),
                    user_message_id: user_message_id.clone(),
                    assistant_message_id: assistant_message_id.clone(),
                    created_at: now,
                },
            );
            pageindex_domain::trace::TraceEvent::ChatRunStarted { session_id: session_id.to_string(), run_id: run_id.clone() }.emit();
            (run_id, user_message_id, assistant_message_id)
        };

        let sup = self.clone();
        let session_id_owned = session_id.to_string();
        let query = content.to_string();
        let run_id_owned = run_id.clone();
        let assistant_message_id_owned = assistant_message_id.clone();
        tokio::spawn(async move {
            sup.run(session_id_owned, run_id_owned, query, assistant_message_id_owned).await;
        });

        Ok((run_id, user_message_id, assistant_message_id))
    }

    /// Apply `f` to the session under lock, persist, and publish the
    /// event it returns (if any) in the same critical section — so
    /// mutation, persistence and emission stay ordered together.
    fn mutate<R>(&self, session_id: &str, f: impl FnOnce(&mut ChatSession) -> (R, Option<ChatEvent>)) -> Result<R> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(session_id).ok_or_else(|| Error::not_found(format!("chat session {session_id}")))?;
        let (result, event) = f(session);
        self.store.chats.save(session_id, session)?;
        if let Some(event) = event {
            let topic = (session_id.to_string(), event.run_id().to_string());
            self.broker.publish(&topic, event);
        }
        Ok(result)
    }

    async fn run(self: Arc<Self>, session_id: String, run_id: String, query: String, assistant_message_id: String) {
        let result = self.run_pipeline(&session_id, &run_id, &query, &assistant_message_id).await;
        if let Err(e) = result {
            let error = e.to_string();
            let _ = self.mutate(&session_id, |session| {
                if let Some(run) = session.run_mut(&run_id) {
                    run.status = RunStatus::Failed;
                    run.error = Some(error.clone());
                    run.updated_at = Utc::now();
                }
                session.active_run_id = None;
                session.active_run_status = None;
                session.updated_at = Utc::now();
                ((), Some(ChatEvent::RunFailed { run_id: run_id.clone(), error: error.clone() }))
            });
            pageindex_domain::trace::TraceEvent::ChatRunFinished {
                session_id: session_id.clone(),
                run_id: run_id.clone(),
                status: "FAILED".to_string(),
            }
            .emit();
        }
    }

    async fn run_pipeline(self: &Arc<Self>, session_id: &str, run_id: &str, query: &str, assistant_message_id: &str) -> Result<()> {
        let session = self.get_session(session_id)?;
        let run = session.runs.iter().find(|r| r.id == run_id).ok_or_else(|| Error::not_found(format!("chat run {run_id}")))?;
        let user_message_id = run.user_message_id.clone();
        let job = self.jobs.get(&session.job_id)?;
        let result_file = job.result_file.clone().ok_or_else(|| Error::validation("job has no result file"))?;
        let raw = std::fs::read_to_string(&result_file)?;
        let root: Value = serde_json::from_str(&raw)?;
        let structure = root
            .get("structure")
            .and_then(|v| v.as_array())
            .cloned()
            .ok_or_else(|| Error::validation("result file's top-level 'structure' is not a list"))?;

        let node_map = retrieval::flatten_tree(&structure);
        let tree_payload = retrieval::build_tree_prompt_payload(&structure);
        let model = job.options.model.clone().unwrap_or_else(|| self.config.chat.default_model.clone());

        let history: Vec<ChatMessage> = session
            .messages
            .iter()
            .take_while(|m| m.id != user_message_id)
            .cloned()
            .collect();

        let (thinking, node_ids) = retrieval::select_nodes(
            self.llm.as_ref(),
            query,
            &history,
            &tree_payload,
            node_map.keys().cloned(),
            &model,
            self.config.chat.history_window,
            self.config.chat.max_selected_nodes,
        )
        .await?;

        let citations = retrieval::build_citations(&node_ids, &node_map);
        self.mutate(session_id, |session| {
            if let Some(run) = session.run_mut(run_id) {
                run.retrieval_thinking = Some(thinking.clone());
                run.selected_node_ids = node_ids.clone();
                run.updated_at = Utc::now();
            }
            session.updated_at = Utc::now();
            (
                (),
                Some(ChatEvent::RetrievalCompleted {
                    run_id: run_id.to_string(),
                    thinking: thinking.clone(),
                    node_ids: node_ids.clone(),
                    citations: citations.clone(),
                }),
            )
        })?;

        let context = retrieval::get_context_for_nodes(
            &job,
            &node_ids,
            &node_map,
            self.config.chat.max_context_nodes,
            self.config.chat.max_node_chars,
            self.config.chat.max_total_context_chars,
        );

        let sup = self.clone();
        let sid = session_id.to_string();
        let rid = run_id.to_string();
        let amid = assistant_message_id.to_string();
        let final_text = retrieval::stream_answer(
            self.llm.as_ref(),
            query,
            &history,
            &context,
            &model,
            self.config.chat.history_window,
            move |delta: String| {
                let sup = sup.clone();
                let sid = sid.clone();
                let rid = rid.clone();
                let amid = amid.clone();
                async move {
                    let _ = sup.mutate(&sid, |session| {
                        if let Some(msg) = session.message_mut(&amid) {
                            msg.content.push_str(&delta);
                        }
                        session.updated_at = Utc::now();
                        ((), Some(ChatEvent::AnswerDelta { run_id: rid.clone(), delta: delta.clone() }))
                    });
                }
            },
        )
        .await?;

        let citations_for_answer = citations.clone();
        self.mutate(session_id, |session| {
            if let Some(msg) = session.message_mut(assistant_message_id) {
                msg.content = final_text.clone();
                msg.citations = citations_for_answer.clone();
            }
            if let Some(run) = session.run_mut(run_id) {
                run.status = RunStatus::Completed;
                run.updated_at = Utc::now();
            }
            session.active_run_id = None;
            session.active_run_status = None;
            session.updated_at = Utc::now();
            (
                (),
                Some(ChatEvent::AnswerCompleted { run_id: run_id.to_string(), citations: citations_for_answer.clone() }),
            )
        })?;
        self.broker.publish(&(session_id.to_string(), run_id.to_string()), ChatEvent::RunCompleted { run_id: run_id.to_string() });
        pageindex_domain::trace::TraceEvent::ChatRunFinished {
            session_id: session_id.to_string(),
            run_id: run_id.to_string(),
            status: "COMPLETED".to_string(),
        }
        .emit();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pageindex_domain::error::Result as DomainResult;
    use pageindex_domain::job::{InputType, Job, JobOptions};
    use pageindex_domain::llm::{BoxStream, ChatRequest, ChatResponse, StreamEvent};

    struct StubLlm;

    #[async_trait::async_trait]
    impl LlmProvider for StubLlm {
        async fn chat(&self, _req: ChatRequest) -> DomainResult<ChatResponse> {
            Ok(ChatResponse {
                content: r#"{"thinking":"looked at node 0001","node_list":["0001"]}"#.to_string(),
                model: "stub".to_string(),
            })
        }

        async fn chat_stream(&self, _req: ChatRequest) -> DomainResult<BoxStream<'static, DomainResult<StreamEvent>>> {
            let events = vec![
                Ok(StreamEvent::Delta { text: "Hello".to_string() }),
                Ok(StreamEvent::Delta { text: " world".to_string() }),
                Ok(StreamEvent::Done),
            ];
            Ok(Box::pin(futures_util::stream::iter(events)))
        }

        fn provider_id(&self) -> &str {
            "stub"
        }
    }

    fn setup() -> (tempfile::TempDir, Arc<JobSupervisor>, Arc<ChatSupervisor>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path()).unwrap());
        let config = Arc::new(Config::default());

        let results_dir = dir.path().join("results");
        std::fs::create_dir_all(&results_dir).unwrap();
        let result_file = results_dir.join("doc_structure.json");
        std::fs::write(
            &result_file,
            serde_json::to_string(&serde_json::json!({
                "structure": [{"node_id": "0001", "title": "Intro", "text": "hello world", "start_index": 1, "end_index": 1}]
            }))
            .unwrap(),
        )
        .unwrap();

        let mut job = Job::new("job1".to_string(), "doc.pdf".to_string(), InputType::Pdf, "doc.pdf".to_string(), JobOptions::default());
        job.status = JobStatus::Completed;
        job.result_file = Some(result_file.to_string_lossy().to_string());
        store.jobs.save("job1", &job).unwrap();
        let jobs = JobSupervisor::new(store.clone(), config.clone()).unwrap();

        let llm: Arc<dyn LlmProvider> = Arc::new(StubLlm);
        let chats = ChatSupervisor::new(store, config, jobs.clone(), llm).unwrap();
        (dir, jobs, chats)
    }

    #[test]
    fn create_session_rejects_non_completed_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path()).unwrap());
        let config = Arc::new(Config::default());
        let job = Job::new("job1".to_string(), "doc.pdf".to_string(), InputType::Pdf, "doc.pdf".to_string(), JobOptions::default());
        store.jobs.save("job1", &job).unwrap();
        let jobs = JobSupervisor::new(store.clone(), config.clone()).unwrap();

        let llm: Arc<dyn LlmProvider> = Arc::new(StubLlm);
        let chats = ChatSupervisor::new(store, config, jobs, llm).unwrap();
        let err = chats.create_session("job1", None).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn full_pipeline_completes_and_populates_citations() {
        let (_dir, _jobs, chats) = setup();
        let session = chats.create_session("job1", Some("  ".to_string())).unwrap();
        assert_eq!(session.title, "Document Chat");

        let (run_id, _user_id, assistant_id) = chats.start_message_run(&session.id, "What is in the intro?").unwrap();

        for _ in 0..200 {
            let refreshed = chats.get_session(&session.id).unwrap();
            if refreshed.active_run_id.is_none() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let refreshed = chats.get_session(&session.id).unwrap();
        assert!(refreshed.active_run_id.is_none());
        let run = refreshed.runs.iter().find(|r| r.id == run_id).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.selected_node_ids, vec!["0001".to_string()]);

        let assistant_message = refreshed.messages.iter().find(|m| m.id == assistant_id).unwrap();
        assert_eq!(assistant_message.content, "Hello world");
        assert_eq!(assistant_message.citations.len(), 1);
        assert_eq!(assistant_message.citations[0].node_id, "0001");
    }

    #[test]
    fn start_message_run_rejects_empty_content() {
        let (_dir, _jobs, chats) = setup();
        let session = chats.create_session("job1", None).unwrap();
        let err = chats.start_message_run(&session.id, "   ").unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn delete_session_removes_it() {
        let (_dir, _jobs, chats) = setup();
        let session = chats.create_session("job1", None).unwrap();
        chats.delete_session(&session.id).unwrap();
        assert!(chats.get_session(&session.id).is_err());
    }
}
