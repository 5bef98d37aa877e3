//! Google Gemini adapter.
//!
//! Implements the `streamGenerateContent` API. Auth is an API key passed as
//! a query parameter (`key={api_key}`), which must never appear verbatim in
//! a log line — see [`redact_url_key`].

use crate::sse::from_reqwest;
use crate::traits::{ChatRequest, ModelAdapter};
use gw_domain::config::ProviderConfig;
use gw_domain::error::{Error, Result};
use gw_domain::model::{Block, Role, Turn};
use gw_domain::stream::{BoxStream, RawChunk, Usage};
use gw_domain::tool::ToolDefinition;
use serde_json::Value;

pub struct GoogleAdapter {
    model_id: String,
    base_url: String,
    api_key: String,
    model_name: String,
    client: reqwest::Client,
}

impl GoogleAdapter {
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

    fn stream_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, self.model_name, self.api_key
        )
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let contents: Vec<Value> = req.history.iter().flat_map(turn_to_gemini_messages).collect();

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {"temperature": 0, "maxOutputTokens": 4096},
        });

        if let Some(system) = &req.system {
            body["systemInstruction"] = serde_json::json!({"parts": [{"text": system}]});
        }

        if !req.tools.is_empty() {
            let decls: Vec<Value> = req.tools.iter().map(tool_to_gemini).collect();
            body["tools"] = serde_json::json!([{"functionDeclarations": decls}]);
        }

        body
    }
}

/// Split a turn's blocks into alternating `model`/`user` content entries,
/// mirroring the Anthropic adapter's message-splitting: `tool_result`
/// blocks live inside the assistant turn in our data model but Gemini
/// expects `functionResponse` parts to arrive in a `user`-role content.
fn turn_to_gemini_messages(turn: &Turn) -> Vec<Value> {
    match turn.role {
        Role::User => vec![serde_json::json!({
            "role": "user",
            "parts": turn.blocks.iter().flat_map(block_to_gemini_parts).collect::<Vec<_>>(),
        })],
        Role::Assistant => {
            let mut out = Vec::new();
            let mut current_role = "model";
            let mut current: Vec<Value> = Vec::new();

            for block in &turn.blocks {
                let block_role = if matches!(block, Block::ToolResult { .. }) {
                    "user"
                } else {
                    "model"
                };
                if block_role != current_role && !current.is_empty() {
                    out.push(serde_json::json!({"role": current_role, "parts": current}));
                    current = Vec::new();
                }
                current_role = block_role;
                current.extend(block_to_gemini_parts(block));
            }
            if !current.is_empty() {
                out.push(serde_json::json!({"role": current_role, "parts": current}));
            }
            out
        }
    }
}

fn block_to_gemini_parts(block: &Block) -> Vec<Value> {
    match block {
        Block::Text { text } => vec![serde_json::json!({"text": text})],
        Block::ToolUse { name, args, .. } => vec![serde_json::json!({
            "functionCall": {"name": name, "args": args}
        })],
        Block::ToolResult {
            tool_use_id,
            blocks,
            ..
        } => {
            let content: Vec<Value> = blocks
                .iter()
                .filter_map(|b| match b {
                    Block::Document { title, text, .. } => {
                        Some(serde_json::json!({"title": title, "text": text}))
                    }
                    _ => None,
                })
                .collect();
            vec![serde_json::json!({
                "functionResponse": {
                    "name": tool_use_id,
                    "response": {"content": content},
                }
            })]
        }
        Block::Document { title, text, .. } => {
            vec![serde_json::json!({"text": format!("[{title}]\n{text}")})]
        }
    }
}

fn tool_to_gemini(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": tool.input_schema,
    })
}

fn parse_usage(v: &Value) -> Option<Usage> {
    let tokens_in = v.get("promptTokenCount")?.as_u64()? as u32;
    let tokens_out = v
        .get("candidatesTokenCount")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;
    Some(Usage { tokens_in, tokens_out })
}

/// Gemini reports each function call whole (no incremental-argument
/// deltas), so one SSE payload can yield a full `ToolUseStart` /
/// `ToolUseDelta` / `ToolUseEnd` triple in one shot.
fn parse_gemini_sse(data: &str) -> Vec<RawChunk> {
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

    let candidate = match v.get("candidates").and_then(|c| c.as_array()).and_then(|a| a.first()) {
        Some(c) => c,
        None => return out,
    };

    if let Some(parts) = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
    {
        for part in parts {
            if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                if !text.is_empty() {
                    out.push(RawChunk::Text(text.to_string()));
                }
            }
            if let Some(fc) = part.get("functionCall") {
                let name = fc.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let args = fc.get("args").cloned().unwrap_or(Value::Object(Default::default()));
                let id = format!("call_{}", uuid::Uuid::new_v4());
                out.push(RawChunk::ToolUseStart { id: id.clone(), name });
                out.push(RawChunk::ToolUseDelta {
                    id: id.clone(),
                    delta_json: args.to_string(),
                });
                out.push(RawChunk::ToolUseEnd { id });
            }
        }
    }

    if candidate.get("finishReason").and_then(|v| v.as_str()).is_some() {
        let usage = v.get("usageMetadata").and_then(parse_usage).unwrap_or_default();
        out.push(RawChunk::Done { usage });
    }

    out
}

/// Strip the `key=...` query parameter before a URL reaches a log line.
pub(crate) fn redact_url_key(url: &str) -> String {
    if let Some(idx) = url.find("key=") {
        let prefix = &url[..idx + 4];
        let rest = &url[idx + 4..];
        let end = rest.find('&').unwrap_or(rest.len());
        format!("{prefix}[REDACTED]{}", &rest[end..])
    } else {
        url.to_string()
    }
}

#[async_trait::async_trait]
impl ModelAdapter for GoogleAdapter {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn stream(&self, req: ChatRequest) -> Result<BoxStream<'static, RawChunk>> {
        let url = self.stream_url();
        let body = self.build_body(&req);
        let model_id = self.model_id.clone();

        tracing::debug!(model_id = %model_id, url = %redact_url_key(&url), "google stream request");

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Model {
                model_id,
                message: format!("HTTP {} - {text}", status.as_u16()),
            });
        }

        Ok(crate::sse::sse_response_stream(resp, move |data| parse_gemini_sse(data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_url_key_strips_key_value() {
        let url = "https://x/foo?alt=sse&key=abc123&other=1";
        let redacted = redact_url_key(url);
        assert!(!redacted.contains("abc123"));
        assert!(redacted.contains("[REDACTED]"));
        assert!(redacted.contains("other=1"));
    }

    #[test]
    fn url_without_key_is_unchanged() {
        let url = "https://x/foo?alt=sse";
        assert_eq!(redact_url_key(url), url);
    }

    #[test]
    fn text_part_becomes_raw_text_chunk() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"hi"}]}}]}"#;
        let chunks = parse_gemini_sse(data);
        assert!(matches!(&chunks[0], RawChunk::Text(t) if t == "hi"));
    }

    #[test]
    fn function_call_emits_start_delta_end_triple() {
        let data = r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"search","args":{"q":"x"}}}]}}]}"#;
        let chunks = parse_gemini_sse(data);
        assert_eq!(chunks.len(), 3);
        assert!(matches!(chunks[0], RawChunk::ToolUseStart { .. }));
        assert!(matches!(chunks[1], RawChunk::ToolUseDelta { .. }));
        assert!(matches!(chunks[2], RawChunk::ToolUseEnd { .. }));
    }

    #[test]
    fn finish_reason_emits_done() {
        let data = r#"{"candidates":[{"content":{"parts":[]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":2}}"#;
        let chunks = parse_gemini_sse(data);
        assert!(matches!(chunks[0], RawChunk::Done { usage: Usage { tokens_in: 3, tokens_out: 2 } }));
    }
}
