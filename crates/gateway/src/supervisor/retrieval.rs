//! Chat Retrieval — the pure tree-shaping/parsing helpers plus
//! the two LLM-coupled steps of the chat pipeline: node selection and
//! streaming answer generation. Pure functions are unit-tested directly;
//! the LLM-coupled functions take an `&dyn LlmProvider` so the chat
//! supervisor's tests can substitute a stub.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;

use serde_json::Value;

use pageindex_domain::chat::{ChatMessage, ChatRole, NodeCitation};
use pageindex_domain::error::{Error, Result};
use pageindex_domain::job::Job;
use pageindex_domain::llm::{ChatRequest, LlmProvider, Message, StreamEvent};

use crate::extract::{markdown, pdf};

pub type NodeMap = BTreeMap<String, Value>;

/// Depth-first walk of the nested node tree, yielding `node_id -> node`
/// with the id coerced to a string. Children live under a `nodes` array.
pub fn flatten_tree(structure: &[Value]) -> NodeMap {
    let mut map = NodeMap::new();
    for root in structure {
        walk(root, &mut map);
    }
    map
}

fn walk(node: &Value, map: &mut NodeMap) {
    if let Some(id) = node.get("node_id") {
        let id_str = value_as_id_string(id);
        if !id_str.is_empty() {
            map.insert(id_str, node.clone());
        }
    }
    if let Some(children) = node.get("nodes").and_then(|n| n.as_array()) {
        for child in children {
            walk(child, map);
        }
    }
}

fn value_as_id_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

const TREE_PAYLOAD_FIELDS: &[&str] =
    &["title", "node_id", "summary", "prefix_summary", "start_index", "end_index", "line_num", "nodes"];

/// Strip the tree down to the fields an LLM needs to pick nodes (no raw
/// text), recursively, dropping an empty `nodes` array rather than keeping
/// a noisy `"nodes": []`.
pub fn build_tree_prompt_payload(structure: &[Value]) -> Vec<Value> {
    structure.iter().map(clean_node).collect()
}

fn clean_node(node: &Value) -> Value {
    let Value::Object(map) = node else { return Value::Null };
    let mut cleaned = serde_json::Map::new();
    for key in TREE_PAYLOAD_FIELDS {
        let Some(value) = map.get(*key) else { continue };
        if *key == "nodes" {
            if let Some(children) = value.as_array() {
                if !children.is_empty() {
                    cleaned.insert((*key).to_string(), Value::Array(children.iter().map(clean_node).collect()));
                }
            }
        } else {
            cleaned.insert((*key).to_string(), value.clone());
        }
    }
    Value::Object(cleaned)
}

/// Strip a ```-fenced block (language tag optional) down to its JSON body;
/// if there is no fence, return the trimmed input unchanged.
fn extract_json_text(raw: &str) -> String {
    let stripped = raw.trim();
    if !stripped.starts_with("```") {
        return stripped.to_string();
    }
    for part in stripped.split("```") {
        let mut candidate = part.trim();
        if let Some(rest) = candidate.strip_prefix("json") {
            candidate = rest.trim();
        }
        if candidate.starts_with('{') && candidate.ends_with('}') {
            return candidate.to_string();
        }
    }
    stripped.to_string()
}

/// Parse and validate a node-selection response. Untrusted model output:
/// rejects non-object JSON and missing/mistyped fields, strips fenced
/// variants with or without a language tag, dedupes `node_list` preserving
/// order, drops ids absent from `valid_node_ids`, caps at `max_nodes`.
pub fn parse_selection_response(
    raw: &str,
    valid_node_ids: impl IntoIterator<Item = String>,
    max_nodes: usize,
) -> Result<(String, Vec<String>)> {
    let candidate = extract_json_text(raw);
    let payload: Value = serde_json::from_str(&candidate)
        .map_err(|e| Error::validation(format!("tree search response is not valid JSON: {e}")))?;
    let Value::Object(obj) = payload else {
        return Err(Error::validation("tree search response must be a JSON object"));
    };
    let thinking = obj
        .get("thinking")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::validation("tree search response must include string field 'thinking'"))?;
    let node_list = obj
        .get("node_list")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::validation("tree search response must include list field 'node_list'"))?;

    let allowed: std::collections::HashSet<String> = valid_node_ids.into_iter().collect();
    let mut filtered = Vec::new();
    for item in node_list {
        let id = value_as_id_string(item);
        if !allowed.contains(&id) {
            continue;
        }
        if filtered.contains(&id) {
            continue;
        }
        filtered.push(id);
        if filtered.len() >= max_nodes {
            break;
        }
    }
    Ok((thinking.trim().to_string(), filtered))
}

fn message_window(history: &[ChatMessage], max_turns: usize) -> &[ChatMessage] {
    if max_turns == 0 || history.is_empty() {
        return &[];
    }
    let start = history.len().saturating_sub(max_turns);
    &history[start..]
}

fn role_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::System => "system",
    }
}

fn history_messages(history: &[ChatMessage], history_window: usize) -> Vec<Message> {
    message_window(history, history_window)
        .iter()
        .map(|m| Message { role: to_llm_role(m.role), content: m.content.clone() })
        .collect()
}

fn to_llm_role(role: ChatRole) -> pageindex_domain::llm::Role {
    use pageindex_domain::llm::Role as LR;
    match role {
        ChatRole::User => LR::User,
        ChatRole::Assistant => LR::Assistant,
        ChatRole::System => LR::System,
    }
}

const SELECTION_SYSTEM_PROMPT: &str = "You are given a user question and a document tree.\n\
Each node may include title, node_id, summary, prefix_summary, and page/line bounds.\n\
Select nodes likely to contain evidence for answering the question.\n\
Return strict JSON only in this shape:\n\
{\"thinking\":\"...\",\"node_list\":[\"0001\",\"0002\"]}\n\
Do not include markdown fences or extra text.";

/// LLM-backed node selection: build the selection prompt, call the
/// provider at temperature 0, parse and validate the response.
pub async fn select_nodes(
    llm: &dyn LlmProvider,
    query: &str,
    history: &[ChatMessage],
    tree_payload: &[Value],
    valid_node_ids: impl IntoIterator<Item = String>,
    model: &str,
    history_window: usize,
    max_nodes: usize,
) -> Result<(String, Vec<String>)> {
    let mut messages = vec![Message::system(SELECTION_SYSTEM_PROMPT)];
    messages.extend(history_messages(history, history_window));
    messages.push(Message::user(format!(
        "Question:\n{query}\n\nDocument Tree JSON:\n{}",
        serde_json::to_string(tree_payload).unwrap_or_default()
    )));

    let response = llm
        .chat(ChatRequest { messages, model: Some(model.to_string()), temperature: Some(0.0) })
        .await?;

    parse_selection_response(response.content.trim(), valid_node_ids, max_nodes)
}

fn markdown_bounds(node: &Value, nodes_with_line: &[(i64, String)], total_lines: i64) -> (i64, i64) {
    let start = node.get("line_num").and_then(|v| v.as_i64()).unwrap_or(1).max(1);
    let mut end = total_lines;
    for (line, _) in nodes_with_line {
        if *line > start {
            end = line - 1;
            break;
        }
    }
    (start, end.max(start))
}

fn extract_markdown_text(path: &str, node: &Value, node_map: &NodeMap) -> String {
    let mut nodes_with_line: Vec<(i64, String)> = node_map
        .iter()
        .filter_map(|(id, n)| n.get("line_num").and_then(|v| v.as_i64()).map(|l| (l, id.clone())))
        .collect();
    nodes_with_line.sort_by_key(|(l, _)| *l);

    let Ok(content) = std::fs::read_to_string(path) else { return String::new() };
    let total_lines = content.lines().count() as i64;
    let (start, end) = markdown_bounds(node, &nodes_with_line, total_lines);
    markdown::extract_line_range(Path::new(path), start, Some(end))
}

/// Context extraction: prefer a node's stored `text`; otherwise extract
/// from the input file. Clips per-node to
/// `max_chars_per_node` and cumulatively to `max_chars_total`; drops nodes
/// that add no content.
pub fn get_context_for_nodes(
    job: &Job,
    node_ids: &[String],
    node_map: &NodeMap,
    max_nodes: usize,
    max_chars_per_node: usize,
    max_chars_total: usize,
) -> Vec<Value> {
    let mut items = Vec::new();
    let mut used_total = 0usize;

    for node_id in node_ids.iter().take(max_nodes) {
        let Some(node) = node_map.get(node_id) else { continue };

        let mut text = node.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string();
        if text.trim().is_empty() {
            text = match job.input_type {
                pageindex_domain::job::InputType::Pdf => {
                    let start = node.get("start_index").and_then(|v| v.as_i64());
                    let end = node.get("end_index").and_then(|v| v.as_i64());
                    match (start, end) {
                        (Some(start), Some(end)) => pdf::extract_page_range(Path::new(&job.input_path), start, end),
                        _ => String::new(),
                    }
                }
                pageindex_domain::job::InputType::Md => extract_markdown_text(&job.input_path, node, node_map),
            };
        }

        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        let clipped: String = text.chars().take(max_chars_per_node).collect();
        let remaining = max_chars_total.saturating_sub(used_total);
        if remaining == 0 {
            break;
        }
        let clipped: String = clipped.chars().take(remaining).collect();
        if clipped.trim().is_empty() {
            continue;
        }

        used_total += clipped.chars().count();
        items.push(serde_json::json!({
            "node_id": node_id,
            "title": node.get("title"),
            "start_index": node.get("start_index"),
            "end_index": node.get("end_index"),
            "line_num": node.get("line_num"),
            "text": clipped,
        }));
    }
    items
}

fn format_sources_for_prompt(context_nodes: &[Value]) -> String {
    context_nodes
        .iter()
        .map(|item| {
            let node_id = item.get("node_id").and_then(|v| v.as_str()).unwrap_or("");
            let mut label = format!("node {node_id}");
            let start = item.get("start_index").and_then(|v| v.as_i64());
            let end = item.get("end_index").and_then(|v| v.as_i64());
            if let (Some(start), Some(end)) = (start, end) {
                label.push_str(&format!(" (pages {start}-{end})"));
            } else if let Some(line) = item.get("line_num").and_then(|v| v.as_i64()) {
                label.push_str(&format!(" (line {line})"));
            }
            label
        })
        .collect::<Vec<_>>()
        .join(", ")
}

const ANSWER_SYSTEM_PROMPT: &str = "Answer the user using only provided context snippets from the indexed document.\n\
Use freeform natural language.\n\
If evidence is insufficient, state what is missing.\n\
Finish with a short 'Sources:' line listing node_ids/pages used.";

/// LLM-backed streaming answer generation.
/// `on_delta` is invoked (and awaited) for each non-empty text chunk;
/// returns the concatenated, trimmed final text.
pub async fn stream_answer<F, Fut>(
    llm: &dyn LlmProvider,
    query: &str,
    history: &[ChatMessage],
    context_nodes: &[Value],
    model: &str,
    history_window: usize,
    mut on_delta: F,
) -> Result<String>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ()>,
{
    let context_blob = context_nodes
        .iter()
        .map(|item| {
            let node_id = item.get("node_id").and_then(|v| v.as_str()).unwrap_or("");
            let title = item.get("title").and_then(|v| v.as_str()).unwrap_or("Untitled");
            let mut page_part = String::new();
            let start = item.get("start_index").and_then(|v| v.as_i64());
            let end = item.get("end_index").and_then(|v| v.as_i64());
            if let (Some(start), Some(end)) = (start, end) {
                page_part = format!(" pages={start}-{end}");
            } else if let Some(line) = item.get("line_num").and_then(|v| v.as_i64()) {
                page_part = format!(" line={line}");
            }
            let text = item.get("text").and_then(|v| v.as_str()).unwrap_or("");
            format!("[node_id={node_id}{page_part}] {title}\n{text}")
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    let source_line = format_sources_for_prompt(context_nodes);

    let mut messages = vec![Message::system(ANSWER_SYSTEM_PROMPT)];
    messages.extend(history_messages(history, history_window));
    messages.push(Message::user(format!(
        "Question:\n{query}\n\nContext snippets:\n{context_blob}\n\nCandidate sources for citation line: {source_line}"
    )));

    let mut stream = llm
        .chat_stream(ChatRequest { messages, model: Some(model.to_string()), temperature: Some(0.2) })
        .await?;

    use futures_util::StreamExt;
    let mut output = String::new();
    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::Delta { text } => {
                if text.is_empty() {
                    continue;
                }
                output.push_str(&text);
                on_delta(text).await;
            }
            StreamEvent::Done => break,
        }
    }
    Ok(output.trim().to_string())
}

/// Build citations in selection order, filling title/index fields from
/// `node_map` when the node is present.
pub fn build_citations(node_ids: &[String], node_map: &NodeMap) -> Vec<NodeCitation> {
    node_ids
        .iter()
        .map(|id| {
            let node = node_map.get(id);
            NodeCitation {
                node_id: id.clone(),
                title: node.and_then(|n| n.get("title")).and_then(|v| v.as_str()).map(String::from),
                start_index: node.and_then(|n| n.get("start_index")).and_then(|v| v.as_i64()),
                end_index: node.and_then(|n| n.get("end_index")).and_then(|v| v.as_i64()),
                line_num: node.and_then(|n| n.get("line_num")).and_then(|v| v.as_i64()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, children: Vec<Value>) -> Value {
        serde_json::json!({"node_id": id, "title": format!("Node {id}"), "nodes": children})
    }

    #[test]
    fn flatten_tree_restores_every_node_id() {
        let structure = vec![node("0001", vec![node("0002", vec![]), node("0003", vec![])])];
        let map = flatten_tree(&structure);
        assert_eq!(map.len(), 3);
        assert!(map.contains_key("0001"));
        assert!(map.contains_key("0002"));
        assert!(map.contains_key("0003"));
    }

    #[test]
    fn build_tree_prompt_payload_drops_unlisted_fields_and_empty_nodes() {
        let structure = vec![serde_json::json!({
            "node_id": "0001",
            "title": "Root",
            "text": "should be dropped",
            "nodes": []
        })];
        let payload = build_tree_prompt_payload(&structure);
        let obj = payload[0].as_object().unwrap();
        assert!(!obj.contains_key("text"));
        assert!(!obj.contains_key("nodes"));
        assert_eq!(obj.get("title").unwrap(), "Root");
    }

    #[test]
    fn parse_selection_response_happy_path() {
        let raw = r#"{"thinking":"because","node_list":["0001","0002"]}"#;
        let valid = vec!["0001".to_string(), "0002".to_string()];
        let (thinking, ids) = parse_selection_response(raw, valid, 6).unwrap();
        assert_eq!(thinking, "because");
        assert_eq!(ids, vec!["0001", "0002"]);
    }

    #[test]
    fn parse_selection_response_strips_fenced_json_with_language_tag() {
        let raw = "```json\n{\"thinking\":\"t\",\"node_list\":[\"0001\"]}\n```";
        let (thinking, ids) = parse_selection_response(raw, vec!["0001".to_string()], 6).unwrap();
        assert_eq!(thinking, "t");
        assert_eq!(ids, vec!["0001"]);
    }

    #[test]
    fn parse_selection_response_strips_fence_without_language_tag() {
        let raw = "```\n{\"thinking\":\"t\",\"node_list\":[\"0001\"]}\n```";
        let (_, ids) = parse_selection_response(raw, vec!["0001".to_string()], 6).unwrap();
        assert_eq!(ids, vec!["0001"]);
    }

    #[test]
    fn parse_selection_response_dedupes_and_drops_invalid_ids_and_caps() {
        let raw = r#"{"thinking":"t","node_list":["0001","0001","9999","0002","0003"]}"#;
        let valid = vec!["0001".to_string(), "0002".to_string(), "0003".to_string()];
        let (_, ids) = parse_selection_response(raw, valid, 2).unwrap();
        assert_eq!(ids, vec!["0001", "0002"]);
    }

    #[test]
    fn parse_selection_response_rejects_non_object_json() {
        assert!(parse_selection_response("[1,2,3]", vec![], 6).is_err());
    }

    #[test]
    fn parse_selection_response_rejects_missing_fields() {
        assert!(parse_selection_response(r#"{"thinking":"t"}"#, vec![], 6).is_err());
    }

    #[test]
    fn get_context_for_nodes_prefers_stored_text_and_clips() {
        let job = Job::new(
            "job1".into(),
            "doc.pdf".into(),
            pageindex_domain::job::InputType::Pdf,
            "/nonexistent/doc.pdf".into(),
            Default::default(),
        );
        let mut map = NodeMap::new();
        map.insert("0001".into(), serde_json::json!({"node_id": "0001", "text": "hello world"}));
        let items = get_context_for_nodes(&job, &["0001".to_string()], &map, 6, 5, 24_000);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["text"], "hello");
    }

    #[test]
    fn get_context_for_nodes_drops_nodes_with_no_content() {
        let job = Job::new(
            "job1".into(),
            "doc.pdf".into(),
            pageindex_domain::job::InputType::Pdf,
            "/nonexistent/doc.pdf".into(),
            Default::default(),
        );
        let mut map = NodeMap::new();
        map.insert("0001".into(), serde_json::json!({"node_id": "0001", "start_index": 1, "end_index": 1}));
        let items = get_context_for_nodes(&job, &["0001".to_string()], &map, 6, 6000, 24_000);
        assert!(items.is_empty());
    }

    #[test]
    fn build_citations_preserves_order_and_fills_metadata() {
        let mut map = NodeMap::new();
        map.insert("0001".into(), serde_json::json!({"title": "Revenue", "start_index": 1, "end_index": 1}));
        let citations = build_citations(&["0001".to_string(), "9999".to_string()], &map);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].title.as_deref(), Some("Revenue"));
        assert_eq!(citations[1].title, None);
    }
}
