//! The conversation data model shared by every model adapter: turns,
//! content blocks, and the wire `Event` union streamed to clients.
//!
//! Re-architected from a loosely-typed block mapping into a tagged-variant
//! ADT so the tool-result invariant (every `tool_result` carries at least
//! one `document`) is enforced at construction sites via [`Block::tool_result`]
//! rather than by a deep validation pass over freeform JSON.

use serde::{Deserialize, Serialize};

/// Who produced a turn. Tool-round content (tool_use/tool_result pairs)
/// lives inside the assistant turn, never as a separate role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single content block inside a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        args: serde_json::Value,
    },
    /// Invariant: `blocks` always contains at least one `Document`. Build
    /// via [`Block::tool_result`], which synthesizes a fallback document
    /// when the tool returned nothing.
    ToolResult {
        tool_use_id: String,
        blocks: Vec<Block>,
        is_error: bool,
    },
    Document {
        title: String,
        text: String,
        #[serde(default)]
        metadata: serde_json::Value,
    },
}

impl Block {
    /// Construct a `tool_result` block, synthesizing a "no content found"
    /// document when `blocks` contains no document block.
    pub fn tool_result(tool_use_id: impl Into<String>, mut blocks: Vec<Block>, is_error: bool) -> Self {
        let has_document = blocks.iter().any(|b| matches!(b, Block::Document { .. }));
        if !has_document {
            blocks.push(Block::Document {
                title: "no content found".into(),
                text: String::new(),
                metadata: serde_json::Value::Null,
            });
        }
        Block::ToolResult {
            tool_use_id: tool_use_id.into(),
            blocks,
            is_error,
        }
    }

    /// Rough size in characters, used by the document-block budget and
    /// session-history token estimate (characters / 4).
    fn char_len(&self) -> usize {
        match self {
            Block::Text { text } => text.len(),
            Block::ToolUse { name, args, .. } => name.len() + args.to_string().len(),
            Block::ToolResult { blocks, .. } => blocks.iter().map(Block::char_len).sum(),
            Block::Document { title, text, .. } => title.len() + text.len(),
        }
    }

    fn count_documents(&self, out: &mut usize) {
        if matches!(self, Block::Document { .. }) {
            *out += 1;
        }
        if let Block::ToolResult { blocks, .. } = self {
            for b in blocks {
                b.count_documents(out);
            }
        }
    }
}

/// One turn (user or assistant) inside a single model's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub blocks: Vec<Block>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            blocks: vec![Block::Text { text: text.into() }],
        }
    }

    pub fn assistant(blocks: Vec<Block>) -> Self {
        Self {
            role: Role::Assistant,
            blocks,
        }
    }

    /// Character-count heuristic for token estimation (characters / 4),
    /// per the session-history truncation policy.
    pub fn estimated_tokens(&self) -> usize {
        self.blocks.iter().map(Block::char_len).sum::<usize>() / 4
    }

    pub fn document_count(&self) -> usize {
        let mut n = 0;
        for b in &self.blocks {
            b.count_documents(&mut n);
        }
        n
    }

    /// All text content of the turn, concatenated. Used to build the
    /// assistant turn's committed text for history and for the non-tool
    /// "final answer" path.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event — the wire and internal event union (spec §3, §6)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The single type crossing the adapter boundary. Vendor event shapes
/// never leak past the adapter that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Start {
        model_id: String,
        timestamp: i64,
    },
    Ttft {
        model_id: String,
        ttft_ms: u64,
    },
    Token {
        model_id: String,
        content: String,
    },
    ToolStart {
        model_id: String,
        tool_name: String,
        timestamp: i64,
    },
    ToolEnd {
        model_id: String,
        tool_name: String,
        duration_ms: u64,
    },
    Done {
        model_id: String,
        total_ms: u64,
        tokens_in: u32,
        tokens_out: u32,
    },
    Error {
        model_id: String,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_ms: Option<u64>,
    },
    Heartbeat {
        timestamp: i64,
    },
}

impl Event {
    /// The SSE `event:` frame name for this variant.
    pub fn frame_name(&self) -> &'static str {
        match self {
            Event::Start { .. } => "start",
            Event::Ttft { .. } => "ttft",
            Event::Token { .. } => "token",
            Event::ToolStart { .. } => "tool_start",
            Event::ToolEnd { .. } => "tool_end",
            Event::Done { .. } => "done",
            Event::Error { .. } => "error",
            Event::Heartbeat { .. } => "heartbeat",
        }
    }

    pub fn model_id(&self) -> Option<&str> {
        match self {
            Event::Start { model_id, .. }
            | Event::Ttft { model_id, .. }
            | Event::Token { model_id, .. }
            | Event::ToolStart { model_id, .. }
            | Event::ToolEnd { model_id, .. }
            | Event::Done { model_id, .. }
            | Event::Error { model_id, .. } => Some(model_id),
            Event::Heartbeat { .. } => None,
        }
    }

    pub fn is_terminal_for_model(&self) -> bool {
        matches!(self, Event::Done { .. } | Event::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_synthesizes_document_when_empty() {
        let block = Block::tool_result("call-1", vec![], false);
        match block {
            Block::ToolResult { blocks, .. } => {
                assert_eq!(blocks.len(), 1);
                assert!(matches!(blocks[0], Block::Document { .. }));
            }
            _ => panic!("expected tool_result"),
        }
    }

    #[test]
    fn tool_result_keeps_existing_document() {
        let doc = Block::Document {
            title: "t".into(),
            text: "x".into(),
            metadata: serde_json::Value::Null,
        };
        let block = Block::tool_result("call-1", vec![doc], false);
        match block {
            Block::ToolResult { blocks, .. } => assert_eq!(blocks.len(), 1),
            _ => panic!("expected tool_result"),
        }
    }

    #[test]
    fn turn_document_count_counts_nested_documents() {
        let turn = Turn::assistant(vec![
            Block::Text { text: "hi".into() },
            Block::tool_result("c1", vec![], false),
        ]);
        assert_eq!(turn.document_count(), 1);
    }

    #[test]
    fn event_frame_names_match_spec() {
        assert_eq!(
            Event::Start { model_id: "m".into(), timestamp: 0 }.frame_name(),
            "start"
        );
        assert_eq!(Event::Heartbeat { timestamp: 0 }.frame_name(), "heartbeat");
    }

    #[test]
    fn heartbeat_has_no_model_id() {
        assert_eq!(Event::Heartbeat { timestamp: 0 }.model_id(), None);
    }
}
