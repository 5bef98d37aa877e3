use gw_domain::error::Result;
use gw_domain::model::Turn;
use gw_domain::stream::{BoxStream, RawChunk};
use gw_domain::tool::ToolDefinition;

/// A single streaming request sent to a model adapter: the full per-model
/// history plus the tool definitions available this turn.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Sent as Anthropic's top-level `system` field / Google's `systemInstruction`.
    pub system: Option<String>,
    pub history: Vec<Turn>,
    pub tools: Vec<ToolDefinition>,
}

/// The contract every vendor adapter implements (spec §4.1). An adapter owns
/// nothing about guardrails, tool dispatch, or SSE framing — it only turns
/// one vendor's wire protocol into a stream of [`RawChunk`]s. The shared
/// agent loop in `agent_loop` does the rest, identically for every vendor.
#[async_trait::async_trait]
pub trait ModelAdapter: Send + Sync {
    /// The `model_id` this adapter answers for in the `Event` wire schema.
    fn model_id(&self) -> &str;

    /// Start a streaming turn. The returned stream ends with exactly one
    /// `RawChunk::Done` or `RawChunk::Error`; the caller enforces the
    /// per-model deadline around polling this stream, not the adapter.
    async fn stream(&self, req: ChatRequest) -> Result<BoxStream<'static, RawChunk>>;
}
