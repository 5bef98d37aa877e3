//! Process configuration, loaded from a TOML file and overlaid with
//! environment variables for secrets. Mirrors the teacher's severity-tagged
//! `validate() -> Vec<ConfigIssue>` pattern: warnings are logged, errors
//! are fatal at startup (spec §6: "startup fails fast").

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// HTTP Basic auth. `None` disables auth (dev-only), per spec §4.5.
    #[serde(default)]
    pub basic_auth: Option<BasicAuthConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            cors: CorsConfig::default(),
            basic_auth: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

/// Environment variable names holding the Basic-auth username/password.
/// Names, not values, are stored in the TOML file; values are read once
/// at startup and never logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuthConfig {
    pub username_env: String,
    pub password_env: String,
}

fn d_port() -> u16 {
    8080
}
fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into()]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM providers — the configured model set (spec §3 invariant (a))
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Doubles as the `model_id` used throughout the `Event` wire schema.
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    /// Environment variable holding the vendor API key.
    pub api_key_env: String,
    pub model_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    Google,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "d_deadline_secs")]
    pub deadline_seconds: u64,
    #[serde(default = "d_heartbeat_secs")]
    pub heartbeat_seconds: u64,
    #[serde(default = "d_queue_multiplier")]
    pub queue_capacity_multiplier: usize,
    #[serde(default = "d_max_tool_calls")]
    pub max_tool_calls_per_generation: u32,
    #[serde(default = "d_same_tool_cap")]
    pub consecutive_same_tool_cap: u32,
    #[serde(default = "d_document_budget")]
    pub document_block_budget: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            deadline_seconds: d_deadline_secs(),
            heartbeat_seconds: d_heartbeat_secs(),
            queue_capacity_multiplier: d_queue_multiplier(),
            max_tool_calls_per_generation: d_max_tool_calls(),
            consecutive_same_tool_cap: d_same_tool_cap(),
            document_block_budget: d_document_budget(),
        }
    }
}

fn d_deadline_secs() -> u64 {
    25
}
fn d_heartbeat_secs() -> u64 {
    10
}
fn d_queue_multiplier() -> usize {
    4
}
fn d_max_tool_calls() -> u32 {
    10
}
fn d_same_tool_cap() -> u32 {
    3
}
fn d_document_budget() -> usize {
    100
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "d_capacity")]
    pub capacity: usize,
    #[serde(default = "d_ttl_minutes")]
    pub ttl_minutes: i64,
    #[serde(default = "d_reaper_secs")]
    pub reaper_interval_seconds: u64,
    #[serde(default = "d_max_turns")]
    pub max_turns: usize,
    #[serde(default = "d_max_context_tokens")]
    pub max_context_tokens: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: d_capacity(),
            ttl_minutes: d_ttl_minutes(),
            reaper_interval_seconds: d_reaper_secs(),
            max_turns: d_max_turns(),
            max_context_tokens: d_max_context_tokens(),
        }
    }
}

fn d_capacity() -> usize {
    50
}
fn d_ttl_minutes() -> i64 {
    15
}
fn d_reaper_secs() -> u64 {
    30
}
fn d_max_turns() -> usize {
    5
}
fn d_max_context_tokens() -> usize {
    8000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration, including that every configured
    /// provider's API key environment variable is actually set — startup
    /// must fail fast rather than defer to the first request (spec §6).
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.llm.providers.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "llm.providers".into(),
                message: "at least one model must be configured".into(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for (i, p) in self.llm.providers.iter().enumerate() {
            if p.id.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].id"),
                    message: "model id must not be empty".into(),
                });
            }
            if !seen.insert(p.id.clone()) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].id"),
                    message: format!("duplicate model id \"{}\"", p.id),
                });
            }
            if std::env::var(&p.api_key_env).is_err() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].api_key_env"),
                    message: format!(
                        "environment variable \"{}\" is not set",
                        p.api_key_env
                    ),
                });
            }
        }

        if let Some(auth) = &self.server.basic_auth {
            if std::env::var(&auth.username_env).is_err() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "server.basic_auth.username_env".into(),
                    message: format!("environment variable \"{}\" is not set", auth.username_env),
                });
            }
            if std::env::var(&auth.password_env).is_err() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "server.basic_auth.password_env".into(),
                    message: format!("environment variable \"{}\" is not set", auth.password_env),
                });
            }
        } else {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "server.basic_auth".into(),
                message: "no basic auth configured — all endpoints are unauthenticated".into(),
            });
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        std::env::set_var("TEST_ANTHROPIC_KEY", "sk-test");
        Config {
            llm: LlmConfig {
                providers: vec![ProviderConfig {
                    id: "claude-sonnet-4-5-20250929".into(),
                    kind: ProviderKind::Anthropic,
                    base_url: "https://api.anthropic.com".into(),
                    api_key_env: "TEST_ANTHROPIC_KEY".into(),
                    model_name: "claude-sonnet-4-5-20250929".into(),
                }],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn valid_config_has_no_errors() {
        let issues = valid_config().validate();
        assert!(issues.iter().all(|i| i.severity != ConfigSeverity::Error));
    }

    #[test]
    fn missing_api_key_env_is_error() {
        let mut cfg = valid_config();
        cfg.llm.providers[0].api_key_env = "SOME_UNSET_VAR_XYZ".into();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field.contains("api_key_env")));
    }

    #[test]
    fn no_providers_is_error() {
        let mut cfg = valid_config();
        cfg.llm.providers.clear();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field == "llm.providers"));
    }

    #[test]
    fn duplicate_ids_is_error() {
        let mut cfg = valid_config();
        let dup = cfg.llm.providers[0].clone();
        cfg.llm.providers.push(dup);
        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.message.contains("duplicate")));
    }

    #[test]
    fn no_basic_auth_is_warning_not_error() {
        let cfg = valid_config();
        let issues = cfg.validate();
        let auth_issue = issues.iter().find(|i| i.field == "server.basic_auth").unwrap();
        assert_eq!(auth_issue.severity, ConfigSeverity::Warning);
    }
}
