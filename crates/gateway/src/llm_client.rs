//! OpenAI-compatible chat completion client — the one `LlmProvider`
//! implementation this service ships. Two call shapes back chat retrieval:
//! `chat` for node selection (temperature 0, full response
//! awaited) and `chat_stream` for answer generation (SSE deltas forwarded
//! as they arrive). Any OpenAI-wire-compatible endpoint works by pointing
//! `llm.base_url` elsewhere.

use serde_json::Value;

use pageindex_domain::error::{Error, Result};
use pageindex_domain::llm::{BoxStream, ChatRequest, ChatResponse, LlmProvider, Role, StreamEvent};

pub struct OpenAiCompatClient {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(base_url: String, api_key: Option<String>, timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { base_url, api_key, http }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) if !key.is_empty() => builder.bearer_auth(key),
            _ => builder,
        }
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                serde_json::json!({ "role": role, "content": m.content })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": req.model.clone().unwrap_or_else(|| "gpt-4.1".to_string()),
            "messages": messages,
            "stream": stream,
        });
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatClient {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&req, false);

        let resp = self
            .authed(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Provider {
                provider: "openai_compat".into(),
                message: format!("HTTP {}: {}", status.as_u16(), text),
            });
        }

        let parsed: Value = serde_json::from_str(&text)?;
        let content = parsed
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let model = parsed.get("model").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();

        Ok(ChatResponse { content, model })
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&req, true);

        let resp = self
            .authed(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: "openai_compat".into(),
                message: format!("HTTP {}: {}", status.as_u16(), text),
            });
        }

        Ok(sse_response_stream(resp))
    }

    fn provider_id(&self) -> &str {
        "openai_compat"
    }
}

fn from_reqwest(e: reqwest::Error) -> Error {
    Error::Provider { provider: "openai_compat".into(), message: e.to_string() }
}

/// Extract complete `data:` payloads from a growing SSE buffer. Events are
/// delimited by a blank line; everything after the final delimiter is left
/// in the buffer for the next chunk.
fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);
        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    out.push(data.to_string());
                }
            }
        }
    }
    out
}

fn parse_delta(data: &str) -> Option<Result<StreamEvent>> {
    if data == "[DONE]" {
        return Some(Ok(StreamEvent::Done));
    }
    let parsed: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return Some(Err(Error::Json(e))),
    };
    let text = parsed
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if text.is_empty() {
        return None;
    }
    Some(Ok(StreamEvent::Delta { text: text.to_string() }))
}

fn sse_response_stream(response: reqwest::Response) -> BoxStream<'static, Result<StreamEvent>> {
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for data in drain_data_lines(&mut buffer) {
                        if let Some(event) = parse_delta(&data) {
                            if matches!(event, Ok(StreamEvent::Done)) {
                                done_emitted = true;
                            }
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in drain_data_lines(&mut buffer) {
                            if let Some(event) = parse_delta(&data) {
                                if matches!(event, Ok(StreamEvent::Done)) {
                                    done_emitted = true;
                                }
                                yield event;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done);
        }
    };
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_data_lines_splits_complete_events() {
        let mut buf = "data: {\"a\":1}\n\ndata: {\"a\":2}\n\n".to_string();
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["{\"a\":1}".to_string(), "{\"a\":2}".to_string()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_data_lines_leaves_partial_event_buffered() {
        let mut buf = "data: {\"a\":1}\n\ndata: {\"a\":2".to_string();
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["{\"a\":1}".to_string()]);
        assert_eq!(buf, "data: {\"a\":2");
    }

    #[test]
    fn parse_delta_extracts_content_text() {
        let data = r#"{"choices":[{"delta":{"content":"hello"}}]}"#;
        match parse_delta(data) {
            Some(Ok(StreamEvent::Delta { text })) => assert_eq!(text, "hello"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parse_delta_skips_empty_housekeeping_chunks() {
        let data = r#"{"choices":[{"delta":{}}]}"#;
        assert!(parse_delta(data).is_none());
    }

    #[test]
    fn parse_delta_done_sentinel_yields_done() {
        assert!(matches!(parse_delta("[DONE]"), Some(Ok(StreamEvent::Done))));
    }
}
