use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gw_domain::config::Config;
use gw_domain::tool::ToolRegistry;
use gw_providers::ProviderRegistry;
use gw_sessions::SessionStore;

use crate::auth::BasicAuthCredentials;
use crate::orchestrator::Orchestrator;

/// Shared application state passed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub llm: Arc<ProviderRegistry>,
    pub tools: Arc<ToolRegistry>,
    pub sessions: Arc<SessionStore>,
    pub orchestrator: Arc<Orchestrator>,
    /// `None` disables HTTP Basic auth entirely (dev mode).
    pub basic_auth: Option<BasicAuthCredentials>,
    /// Set on SIGTERM; handlers refuse new generations while draining.
    pub draining: Arc<AtomicBool>,
}

impl AppState {
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub fn start_draining(&self) {
        self.draining.store(true, Ordering::Release);
    }
}
