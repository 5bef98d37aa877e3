use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for vendor streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Token usage for one vendor streaming turn. Some vendors omit usage
/// entirely; adapters that cannot retrieve it emit zeros rather than
/// silently dropping the field (spec §9 open question).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// One incremental step of a vendor's raw streaming response, before
/// guardrails or SSE framing are applied. This is the only shape a
/// per-vendor adapter needs to produce; the shared agent loop in
/// `gw_providers::agent_loop` turns a stream of these into the public
/// `Event` wire union plus tool dispatch.
#[derive(Debug, Clone)]
pub enum RawChunk {
    /// Incremental assistant text.
    Text(String),
    /// A new tool invocation has started streaming.
    ToolUseStart { id: String, name: String },
    /// Incremental JSON-argument bytes for a tool invocation in progress.
    ToolUseDelta { id: String, delta_json: String },
    /// The vendor finished streaming arguments for this tool invocation.
    ToolUseEnd { id: String },
    /// The vendor's turn ended naturally.
    Done { usage: Usage },
    /// A terminal vendor-side error.
    Error { message: String, retriable: bool },
}
