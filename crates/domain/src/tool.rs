//! Tool Registry types: a named set of tools each adapter can invoke.
//!
//! Every tool is a pure async function `(args) -> {blocks, metadata}` with
//! no shared mutable state; calls to backing HTTP services are the tool's
//! own responsibility to pool and time out (spec: adapter/tool boundary).

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::Block;

/// Description of a tool exposed to the model, sent with every vendor
/// request as part of the tool-calling payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub input_schema: serde_json::Value,
}

/// Result of running a tool: content blocks (normally `Document`s) plus
/// whether the call failed.
pub struct ToolOutcome {
    pub blocks: Vec<Block>,
    pub is_error: bool,
}

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn invoke(&self, args: serde_json::Value) -> ToolOutcome;
}

/// Immutable registry of tools available to every adapter.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.definition().name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
