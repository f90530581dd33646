//! Chat session data model — a conversation anchored to one completed job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCitation {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_num: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub citations: Vec<NodeCitation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRun {
    pub id: String,
    pub status: RunStatus,
    pub user_message_id: String,
    pub assistant_message_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_thinking: Option<String>,
    #[serde(default)]
    pub selected_node_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub job_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub last_message_preview: String,
    #[serde(default)]
    pub active_run_id: Option<String>,
    #[serde(default)]
    pub active_run_status: Option<RunStatus>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub runs: Vec<ChatRun>,
}

pub const LAST_MESSAGE_PREVIEW_CAP: usize = 140;

impl ChatSession {
    pub fn new(id: String, job_id: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_id,
            title,
            created_at: now,
            updated_at: now,
            message_count: 0,
            last_message_preview: String::new(),
            active_run_id: None,
            active_run_status: None,
            messages: Vec::new(),
            runs: Vec::new(),
        }
    }

    pub fn push_message(&mut self, message: ChatMessage) {
        let mut preview: String = message.content.chars().take(LAST_MESSAGE_PREVIEW_CAP).collect();
        if message.content.chars().count() > LAST_MESSAGE_PREVIEW_CAP {
            preview.push('\u{2026}');
        }
        self.last_message_preview = preview;
        self.message_count += 1;
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    pub fn message_mut(&mut self, id: &str) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    pub fn run_mut(&mut self, id: &str) -> Option<&mut ChatRun> {
        self.runs.iter_mut().find(|r| r.id == id)
    }

    pub fn has_running_run(&self) -> bool {
        self.active_run_id.is_some()
    }
}
