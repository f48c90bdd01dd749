//! Client authentication middleware
//!
//! Bearer tokens (all routes) and `x-goog-api-key` (Gemini routes) are
//! matched against the configured allow-list. `auth.disable_auth` skips
//! the check entirely.

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use switchboard_core::ProxyError;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if state.config.auth.disable_auth {
        return next.run(req).await;
    }
    if state.config.auth.api_keys.is_empty() {
        return ApiError(ProxyError::Authentication(
            "No client API keys are configured".to_string(),
        ))
        .into_response();
    }

    let provided = extract_bearer(req.headers().get(axum::http::header::AUTHORIZATION))
        .or_else(|| {
            req.headers()
                .get("x-goog-api-key")
                .and_then(|value| value.to_str().ok())
                .map(|value| value.trim().to_string())
        });

    match provided {
        Some(token) if state.config.auth.api_keys.iter().any(|key| key == &token) => {
            next.run(req).await
        }
        _ => ApiError(ProxyError::Authentication(
            "Invalid or missing API key".to_string(),
        ))
        .into_response(),
    }
}

fn extract_bearer(header: Option<&HeaderValue>) -> Option<String> {
    let value = header?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(|token| token.trim().to_string())
}

/// Session id from the `X-Session-ID` header, defaulting to `"default"`.
pub fn session_id_from_headers(headers: &axum::http::HeaderMap) -> String {
    headers
        .get("x-session-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "default".to_string())
}
