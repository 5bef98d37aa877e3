use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::Json as JsonExtractor;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gw_domain::error::Error;
use gw_domain::model::Event;

use crate::state::AppState;

const MAX_MESSAGE_BYTES: usize = 16 * 1024;

fn error_response(err: Error) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut resp = (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response();
    if matches!(err, Error::Overloaded) {
        resp.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from_static("5"));
    }
    resp
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/query
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub session_id: Uuid,
}

pub async fn query(State(state): State<AppState>, JsonExtractor(body): JsonExtractor<QueryRequest>) -> Response {
    if state.is_draining() {
        return error_response(Error::Other("server is shutting down".into()));
    }
    if body.message.is_empty() || body.message.len() > MAX_MESSAGE_BYTES {
        return error_response(Error::Input("message must be non-empty and at most 16KB".into()));
    }

    let session = match body.session_id {
        Some(id) => match state.sessions.get(id) {
            Some(s) => s,
            None => return error_response(Error::NotFound(id.to_string())),
        },
        None => match state.sessions.create() {
            Ok(s) => s,
            Err(e) => return error_response(e),
        },
    };

    if session.is_busy() {
        return error_response(Error::BusySession);
    }

    session.append_user_turn(&body.message);

    Json(QueryResponse { session_id: session.id }).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/stream/{session_id}
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn to_sse_event(event: &Event) -> SseEvent {
    let data = serde_json::to_string(event).unwrap_or_default();
    SseEvent::default().event(event.frame_name()).data(data)
}

/// Cancels the orchestrator generation for one session when dropped —
/// covers both normal stream completion (a no-op, the generation is
/// already finished) and client disconnect mid-stream.
struct CancelOnDrop {
    orchestrator: std::sync::Arc<crate::orchestrator::Orchestrator>,
    session_id: Uuid,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.orchestrator.cancel(self.session_id);
    }
}

pub async fn stream(State(state): State<AppState>, Path(session_id): Path<Uuid>) -> Response {
    let session = match state.sessions.get(session_id) {
        Some(s) => s,
        None => return error_response(Error::NotFound(session_id.to_string())),
    };

    let (_handle, mut rx) = match state.orchestrator.begin(session) {
        Ok(pair) => pair,
        Err(e) => return error_response(e),
    };

    let orchestrator = state.orchestrator.clone();
    let body_stream = async_stream::stream! {
        let _guard = CancelOnDrop { orchestrator, session_id };
        yield Ok::<_, Infallible>(SseEvent::default().retry(Duration::from_millis(3_600_000)));
        while let Some(event) = rx.recv().await {
            if matches!(event, Event::Heartbeat { .. }) {
                yield Ok(SseEvent::default().comment("hb"));
            }
            yield Ok(to_sse_event(&event));
        }
    };

    let mut response = Sse::new(body_stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/cancel/{session_id}
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn cancel(State(state): State<AppState>, Path(session_id): Path<Uuid>) -> StatusCode {
    if state.orchestrator.cancel(session_id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /health, GET /debug/memory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

fn rss_bytes() -> u64 {
    let Ok(statm) = std::fs::read_to_string("/proc/self/statm") else {
        return 0;
    };
    let resident_pages: u64 = statm.split_whitespace().nth(1).and_then(|s| s.parse().ok()).unwrap_or(0);
    resident_pages * 4096
}

pub async fn debug_memory(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "rss_bytes": rss_bytes(),
        "session_count": state.sessions.len(),
    }))
}
