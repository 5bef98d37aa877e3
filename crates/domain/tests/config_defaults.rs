use gw_domain::config::Config;

#[test]
fn default_host_is_wildcard() {
    let config = Config::default();
    assert_eq!(config.server.host, "0.0.0.0");
}

#[test]
fn default_port_is_8080() {
    let config = Config::default();
    assert_eq!(config.server.port, 8080);
}

#[test]
fn explicit_host_and_port_parse_from_toml() {
    let toml_str = r#"
[server]
host = "127.0.0.1"
port = 3210
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 3210);
}

#[test]
fn session_defaults_match_spec() {
    let config = Config::default();
    assert_eq!(config.session.capacity, 50);
    assert_eq!(config.session.ttl_minutes, 15);
    assert_eq!(config.session.max_turns, 5);
    assert_eq!(config.session.max_context_tokens, 8000);
}

#[test]
fn orchestrator_defaults_match_spec() {
    let config = Config::default();
    assert_eq!(config.orchestrator.deadline_seconds, 25);
    assert_eq!(config.orchestrator.heartbeat_seconds, 10);
    assert_eq!(config.orchestrator.consecutive_same_tool_cap, 3);
    assert_eq!(config.orchestrator.max_tool_calls_per_generation, 10);
    assert_eq!(config.orchestrator.document_block_budget, 100);
}
