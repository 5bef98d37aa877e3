//! Adapter registry: the configured model set.
//!
//! Constructs one [`ModelAdapter`] per entry in [`LlmConfig`] and holds them
//! keyed by `model_id`. `Config::validate` already confirmed every API key
//! env var is set before this runs, so a construction failure here means a
//! genuinely bad configuration (e.g. an unreachable base URL scheme) and is
//! always fatal at startup, never a soft-skip.

use crate::anthropic::AnthropicAdapter;
use crate::google::GoogleAdapter;
use crate::traits::ModelAdapter;
use gw_domain::config::{LlmConfig, ProviderKind};
use gw_domain::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Mask substrings that look like API keys or bearer tokens in an error
/// message before it is logged.
fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = if trimmed.len() > 8 {
                format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..])
            } else {
                "***masked***".to_string()
            };
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ModelAdapter>>,
}

impl ProviderRegistry {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut adapters: HashMap<String, Arc<dyn ModelAdapter>> = HashMap::new();

        for pc in &config.providers {
            let adapter: Arc<dyn ModelAdapter> = match pc.kind {
                ProviderKind::Anthropic => Arc::new(AnthropicAdapter::from_config(pc).map_err(|e| {
                    Error::Config(format!("model {}: {}", pc.id, mask_secrets(&e.to_string())))
                })?),
                ProviderKind::Google => Arc::new(GoogleAdapter::from_config(pc).map_err(|e| {
                    Error::Config(format!("model {}: {}", pc.id, mask_secrets(&e.to_string())))
                })?),
            };

            tracing::info!(model_id = %pc.id, kind = ?pc.kind, "registered model adapter");
            adapters.insert(pc.id.clone(), adapter);
        }

        Ok(Self { adapters })
    }

    pub fn get(&self, model_id: &str) -> Option<Arc<dyn ModelAdapter>> {
        self.adapters.get(model_id).cloned()
    }

    /// The configured model set, in a stable order. Used to check the
    /// invariant that a generation's `start`/terminal event sets exactly
    /// match the configured models.
    pub fn model_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
