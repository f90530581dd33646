//! Provider-agnostic LLM request/response/streaming types and the trait
//! every adapter implements. Trimmed from the shape of a general tool-calling
//! chat interface down to what chat retrieval actually needs: plain
//! text-in/text-out completion (node selection) and a streaming text
//! completion (answer generation). No tool-calling surface is modelled here
//! because neither retrieval phase exercises one.

use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: text.into() }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: text.into() }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: text.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
}

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// A single incremental chunk of a streaming completion. Provider adapters
/// translate their wire format (SSE `data:` frames, newline-delimited JSON,
/// ...) down to this shape; callers only ever see a text delta or the end
/// of the stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Delta { text: String },
    Done,
}

/// Trait every LLM adapter must implement. Two call shapes are used by
/// chat retrieval: `chat` for node selection (temperature 0, full
/// response awaited), `chat_stream` for answer generation (deltas
/// forwarded to the caller as they arrive).
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse>;

    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    fn provider_id(&self) -> &str;
}
