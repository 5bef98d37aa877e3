pub mod handlers;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::auth::require_basic_auth;
use crate::state::AppState;

/// Assemble the full HTTP surface. `/health` is reachable without
/// credentials; every other route requires HTTP Basic auth when
/// `state.basic_auth` is configured.
pub fn router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/api/query", post(handlers::query))
        .route("/api/stream/:session_id", get(handlers::stream))
        .route("/api/cancel/:session_id", post(handlers::cancel))
        .route("/debug/memory", get(handlers::debug_memory))
        .route_layer(middleware::from_fn_with_state(state, require_basic_auth));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
}
