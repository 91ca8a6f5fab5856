//! Optional auth token middleware.
//!
//! When `--auth-token` is configured, every request must include
//! `Authorization: Bearer <token>` (or `?token=<token>` for WebSocket).
//! The `/health` endpoint remains unauthenticated.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::debug;

/// Axum middleware that checks for a valid auth token.
pub async fn auth_middleware(
    State(expected_token): State<String>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let bearer = req
        .headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if bearer == Some(expected_token.as_str()) {
        return Ok(next.run(req).await);
    }

    // Query token is percent-encoded by clients.
    let query_match = req.uri().query().is_some_and(|query| {
        query
            .split('&')
            .filter_map(|pair| pair.strip_prefix("token="))
            .any(|token| urlencoding::decode(token).is_ok_and(|t| t == expected_token))
    });
    if query_match {
        return Ok(next.run(req).await);
    }

    debug!(
        component = "auth",
        event = "auth.rejected",
        path = %req.uri().path(),
        "Request rejected, missing or invalid token"
    );
    Err(StatusCode::UNAUTHORIZED)
}
