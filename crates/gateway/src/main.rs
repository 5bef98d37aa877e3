use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use gw_domain::config::{Config, ConfigSeverity};
use gw_gateway::api;
use gw_gateway::auth::BasicAuthCredentials;
use gw_gateway::cli::{self, Cli, Command, ConfigCommand};
use gw_gateway::orchestrator::Orchestrator;
use gw_gateway::state::AppState;
use gw_gateway::tools::LookupReference;
use gw_providers::ProviderRegistry;
use gw_sessions::SessionStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = cli::load_config(&cli.config)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let config = cli::load_config(&cli.config)?;
            if !cli::config::validate(&config) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let config = cli::load_config(&cli.config)?;
            cli::config::show(&config);
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,gw_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("gateway starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    // ── LLM providers ────────────────────────────────────────────────
    let llm = Arc::new(ProviderRegistry::from_config(&config.llm).context("initializing LLM providers")?);
    tracing::info!(providers = llm.len(), "model adapter registry ready");

    // ── Tools ────────────────────────────────────────────────────────
    let mut tool_registry = gw_domain::tool::ToolRegistry::new();
    tool_registry.register(Arc::new(LookupReference));
    let tools = Arc::new(tool_registry);

    // ── Sessions ─────────────────────────────────────────────────────
    let sessions = Arc::new(SessionStore::new(&config.session, llm.model_ids()));
    sessions
        .clone()
        .spawn_reaper(std::time::Duration::from_secs(config.session.reaper_interval_seconds));
    tracing::info!(capacity = config.session.capacity, "session store ready");

    // ── Orchestrator ─────────────────────────────────────────────────
    let orchestrator = Arc::new(Orchestrator::new(llm.clone(), tools.clone(), &config.orchestrator));

    // ── HTTP Basic auth (read once at startup) ──────────────────────
    let basic_auth = match &config.server.basic_auth {
        Some(auth) => {
            let username = std::env::var(&auth.username_env)
                .with_context(|| format!("reading {}", auth.username_env))?;
            let password = std::env::var(&auth.password_env)
                .with_context(|| format!("reading {}", auth.password_env))?;
            tracing::info!("HTTP Basic auth enabled");
            Some(BasicAuthCredentials { username, password })
        }
        None => {
            tracing::warn!("HTTP Basic auth DISABLED — no [server.basic_auth] in config");
            None
        }
    };

    let draining = Arc::new(AtomicBool::new(false));

    let state = AppState {
        config: config.clone(),
        llm,
        tools,
        sessions,
        orchestrator: orchestrator.clone(),
        basic_auth,
        draining: draining.clone(),
    };

    // ── CORS ─────────────────────────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);

    let app = api::router(state.clone()).layer(cors_layer).with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(draining, orchestrator))
        .await
        .context("axum server error")?;

    Ok(())
}

/// Waits for SIGTERM/Ctrl-C, flips the draining flag so new `/api/query`
/// requests are refused, cancels every in-flight generation, then gives
/// them up to 5 seconds to wind down before the listener closes.
async fn shutdown_signal(draining: Arc<AtomicBool>, orchestrator: Arc<Orchestrator>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining");
    draining.store(true, std::sync::atomic::Ordering::Release);
    orchestrator.cancel_all();

    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
}

/// Build a [`CorsLayer`] from the configured allowed origins. Origins may
/// contain a trailing `*` wildcard for the port segment (e.g.
/// `http://localhost:*`); a literal `"*"` allows all origins.
fn build_cors_layer(cors: &gw_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            let prefix = origin.trim_end_matches('*').to_owned();
            wildcard_prefixes.push(prefix);
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
