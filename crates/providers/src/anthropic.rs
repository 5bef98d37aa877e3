//! Anthropic-native adapter.
//!
//! Implements the Anthropic Messages API streaming contract: tool use,
//! the Anthropic-specific top-level `system` field, and prompt-caching
//! (a `cache_control` breakpoint on the last history block, since the
//! session's own history is the part worth caching across turns).

use crate::sse::from_reqwest;
use crate::traits::{ChatRequest, ModelAdapter};
use gw_domain::config::ProviderConfig;
use gw_domain::error::{Error, Result};
use gw_domain::model::{Block, Role, Turn};
use gw_domain::stream::{BoxStream, RawChunk, Usage};
use gw_domain::tool::ToolDefinition;
use serde_json::Value;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    model_id: String,
    base_url: String,
    api_key: String,
    model_name: String,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .map_err(|_| Error::Config(format!("{} is not set", cfg.api_key_env)))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            model_id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            model_name: cfg.model_name.clone(),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("anthropic-beta", "prompt-caching-2024-07-31")
            .header("Content-Type", "application/json")
    }

    fn build_messages_body(&self, req: &ChatRequest) -> Value {
        let mut api_messages: Vec<Value> = req
            .history
            .iter()
            .flat_map(turn_to_anthropic_messages)
            .collect();

        // Mark the last content block of the last message as the prompt-cache
        // breakpoint: the session's own history is what's worth caching
        // across turns, not any one-off system prompt.
        if let Some(last_message) = api_messages.last_mut() {
            if let Some(content) = last_message.get_mut("content").and_then(Value::as_array_mut) {
                if let Some(last_block) = content.last_mut() {
                    last_block["cache_control"] = serde_json::json!({"type": "ephemeral"});
                }
            }
        }

        let mut body = serde_json::json!({
            "model": self.model_name,
            "messages": api_messages,
            "stream": true,
            "max_tokens": 4096,
            "temperature": 0,
        });

        if let Some(system) = &req.system {
            body["system"] = serde_json::json!([{
                "type": "text",
                "text": system,
            }]);
        }

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_anthropic).collect();
            body["tools"] = Value::Array(tools);
        }

        body
    }
}

/// Turn a single internal `Turn` into one or more Anthropic API messages.
///
/// A user turn maps straight across. An assistant turn may interleave
/// `tool_result` blocks with text/`tool_use` blocks — the data model keeps
/// those inside the same assistant turn (spec invariant: tool rounds never
/// create a separate user turn), but Anthropic's wire format requires
/// `tool_result` content to arrive as a `user`-role message. This splits a
/// turn's blocks into alternating assistant/user message runs so ordering
/// is preserved.
fn turn_to_anthropic_messages(turn: &Turn) -> Vec<Value> {
    match turn.role {
        Role::User => vec![serde_json::json!({
            "role": "user",
            "content": turn.blocks.iter().map(block_to_anthropic).collect::<Vec<_>>(),
        })],
        Role::Assistant => {
            let mut messages = Vec::new();
            let mut current_role = "assistant";
            let mut current: Vec<Value> = Vec::new();

            for block in &turn.blocks {
                let block_role = if matches!(block, Block::ToolResult { .. }) {
                    "user"
                } else {
                    "assistant"
                };
                if block_role != current_role && !current.is_empty() {
                    messages.push(serde_json::json!({"role": current_role, "content": current}));
                    current = Vec::new();
                }
                current_role = block_role;
                current.push(block_to_anthropic(block));
            }
            if !current.is_empty() {
                messages.push(serde_json::json!({"role": current_role, "content": current}));
            }
            messages
        }
    }
}

fn block_to_anthropic(block: &Block) -> Value {
    match block {
        Block::Text { text } => serde_json::json!({"type": "text", "text": text}),
        Block::ToolUse { id, name, args } => serde_json::json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": args,
        }),
        Block::ToolResult {
            tool_use_id,
            blocks,
            is_error,
        } => serde_json::json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": blocks.iter().map(block_to_anthropic).collect::<Vec<_>>(),
            "is_error": is_error,
        }),
        Block::Document { title, text, .. } => serde_json::json!({
            "type": "text",
            "text": format!("[{title}]\n{text}"),
        }),
    }
}

fn tool_to_anthropic(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.input_schema,
    })
}

fn parse_usage(v: &Value) -> Option<Usage> {
    let tokens_in = v.get("input_tokens")?.as_u64()? as u32;
    let tokens_out = v.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    Some(Usage { tokens_in, tokens_out })
}

/// State for assembling tool-call arguments across streamed deltas.
struct StreamState {
    active: std::collections::HashMap<u64, String>,
    usage: Usage,
}

impl StreamState {
    fn new() -> Self {
        Self {
            active: std::collections::HashMap::new(),
            usage: Usage::default(),
        }
    }
}

fn parse_anthropic_sse(data: &str, state: &mut StreamState) -> Vec<RawChunk> {
    let mut out = Vec::new();

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            out.push(RawChunk::Error {
                message: e.to_string(),
                retriable: false,
            });
            return out;
        }
    };

    let event_type = v.get("type").and_then(|v| v.as_str()).unwrap_or("");

    match event_type {
        "message_start" => {
            if let Some(usage) = v.get("message").and_then(|m| m.get("usage")).and_then(parse_usage) {
                state.usage = usage;
            }
        }

        "content_block_start" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(block) = v.get("content_block") {
                if block.get("type").and_then(|v| v.as_str()) == Some("tool_use") {
                    let id = block.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    let name = block.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    out.push(RawChunk::ToolUseStart {
                        id: id.clone(),
                        name,
                    });
                    state.active.insert(idx, id);
                }
            }
        }

        "content_block_delta" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(delta) = v.get("delta") {
                match delta.get("type").and_then(|v| v.as_str()).unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                            if !text.is_empty() {
                                out.push(RawChunk::Text(text.to_string()));
                            }
                        }
                    }
                    "input_json_delta" => {
                        if let Some(partial) = delta.get("partial_json").and_then(|v| v.as_str()) {
                            if let Some(id) = state.active.get(&idx) {
                                out.push(RawChunk::ToolUseDelta {
                                    id: id.clone(),
                                    delta_json: partial.to_string(),
                                });
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        "content_block_stop" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(id) = state.active.remove(&idx) {
                out.push(RawChunk::ToolUseEnd { id });
            }
        }

        "message_delta" => {
            if let Some(output) = v
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(|v| v.as_u64())
            {
                state.usage.tokens_out = output as u32;
            }
        }

        "message_stop" => {
            out.push(RawChunk::Done { usage: state.usage });
        }

        "error" => {
            let msg = v
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            out.push(RawChunk::Error {
                message: msg.to_string(),
                retriable: false,
            });
        }

        _ => {}
    }

    out
}

#[async_trait::async_trait]
impl ModelAdapter for AnthropicAdapter {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn stream(&self, req: ChatRequest) -> Result<BoxStream<'static, RawChunk>> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_messages_body(&req);
        let model_id = self.model_id.clone();

        tracing::debug!(model_id = %model_id, %url, "anthropic stream request");

        let resp = self.authed_post(&url).json(&body).send().await.map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Model {
                model_id,
                message: format!("HTTP {} - {text}", status.as_u16()),
            });
        }

        let mut state = StreamState::new();
        Ok(crate::sse::sse_response_stream(resp, move |data| {
            parse_anthropic_sse(data, &mut state)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_delta_becomes_raw_text_chunk() {
        let mut state = StreamState::new();
        let data = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#;
        let chunks = parse_anthropic_sse(data, &mut state);
        assert!(matches!(&chunks[0], RawChunk::Text(t) if t == "hi"));
    }

    #[test]
    fn tool_use_lifecycle_emits_start_delta_end() {
        let mut state = StreamState::new();
        let start = r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"search"}}"#;
        let delta = r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"q\":1}"}}"#;
        let stop = r#"{"type":"content_block_stop","index":0}"#;

        assert!(matches!(parse_anthropic_sse(start, &mut state)[0], RawChunk::ToolUseStart { .. }));
        assert!(matches!(parse_anthropic_sse(delta, &mut state)[0], RawChunk::ToolUseDelta { .. }));
        assert!(matches!(parse_anthropic_sse(stop, &mut state)[0], RawChunk::ToolUseEnd { .. }));
    }

    #[test]
    fn message_stop_emits_done_with_usage() {
        let mut state = StreamState::new();
        state.usage = Usage { tokens_in: 10, tokens_out: 5 };
        let data = r#"{"type":"message_stop"}"#;
        let chunks = parse_anthropic_sse(data, &mut state);
        assert!(matches!(chunks[0], RawChunk::Done { usage: Usage { tokens_in: 10, tokens_out: 5 } }));
    }

    #[test]
    fn error_event_is_terminal() {
        let mut state = StreamState::new();
        let data = r#"{"type":"error","error":{"message":"overloaded"}}"#;
        let chunks = parse_anthropic_sse(data, &mut state);
        assert!(matches!(&chunks[0], RawChunk::Error { message, .. } if message == "overloaded"));
    }

    #[test]
    fn build_messages_body_marks_last_history_block_as_cache_breakpoint() {
        let cfg = ProviderConfig {
            id: "claude".into(),
            kind: gw_domain::config::ProviderKind::Anthropic,
            base_url: "https://api.anthropic.com".into(),
            api_key_env: "TEST_KEY_UNSET".into(),
            model_name: "claude-sonnet-4-5".into(),
        };
        std::env::set_var("TEST_KEY_UNSET", "sk-test");
        let adapter = AnthropicAdapter::from_config(&cfg).unwrap();
        let req = ChatRequest {
            system: Some("be helpful".into()),
            history: vec![Turn::user("hi"), Turn::user("how are you")],
            tools: vec![],
        };
        let body = adapter.build_messages_body(&req);
        let messages = body["messages"].as_array().unwrap();
        let last_content = messages.last().unwrap()["content"].as_array().unwrap();
        assert_eq!(last_content.last().unwrap()["cache_control"]["type"], "ephemeral");
        // only the breakpoint message carries the marker
        let first_content = messages.first().unwrap()["content"].as_array().unwrap();
        assert!(first_content.last().unwrap().get("cache_control").is_none());
        assert!(body["system"][0].get("cache_control").is_none());
    }
}
