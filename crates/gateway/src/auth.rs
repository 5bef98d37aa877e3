//! HTTP Basic authentication middleware.
//!
//! Reads the username/password from the env vars named in
//! `config.server.basic_auth` **once at startup** (see `state.rs`). If no
//! `basic_auth` section is configured, auth is disabled — dev mode only.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use subtle::ConstantTimeEq;

use crate::state::AppState;

#[derive(Clone)]
pub struct BasicAuthCredentials {
    pub username: String,
    pub password: String,
}

fn unauthorized() -> Response {
    let mut resp = (
        StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({ "error": "missing or invalid credentials" })),
    )
        .into_response();
    resp.headers_mut().insert(
        axum::http::header::WWW_AUTHENTICATE,
        HeaderValue::from_static(r#"Basic realm="gateway""#),
    );
    resp
}

pub async fn require_basic_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = &state.basic_auth else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .and_then(|b64| base64::engine::general_purpose::STANDARD.decode(b64).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .and_then(|decoded| decoded.split_once(':').map(|(u, p)| (u.to_string(), p.to_string())));

    let (username, password) = match provided {
        Some(pair) => pair,
        None => return unauthorized(),
    };

    let username_ok = username.as_bytes().ct_eq(expected.username.as_bytes()).into();
    let password_ok = password.as_bytes().ct_eq(expected.password.as_bytes()).into();

    if !(username_ok && password_ok) {
        return unauthorized();
    }

    next.run(req).await
}
