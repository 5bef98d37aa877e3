//! The one in-process tool the gateway ships: a stand-in reference lookup
//! used to exercise the tool loop and its guardrails end-to-end without
//! depending on an external search HTTP client.

use async_trait::async_trait;
use gw_domain::model::Block;
use gw_domain::tool::{Tool, ToolDefinition, ToolOutcome};

pub struct LookupReference;

#[async_trait]
impl Tool for LookupReference {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "lookup_reference".into(),
            description: "Looks up a short reference passage for a topic. Returns synthetic content for demonstration purposes.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "topic": {"type": "string", "description": "topic to look up"}
                },
                "required": ["topic"]
            }),
        }
    }

    async fn invoke(&self, args: serde_json::Value) -> ToolOutcome {
        let topic = args.get("topic").and_then(|v| v.as_str()).unwrap_or("").trim();

        if topic.is_empty() {
            return ToolOutcome {
                blocks: vec![Block::Document {
                    title: "invalid request".into(),
                    text: "topic must be a non-empty string".into(),
                    metadata: serde_json::Value::Null,
                }],
                is_error: true,
            };
        }

        ToolOutcome {
            blocks: vec![Block::Document {
                title: format!("reference: {topic}"),
                text: format!(
                    "Synthetic passage about \"{topic}\" for comparison purposes. \
                     No external reference source is configured for this tool."
                ),
                metadata: serde_json::json!({"topic": topic}),
            }],
            is_error: false,
        }
    }
}
