//! OpenAI-compatible routes

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use uuid::Uuid;

use switchboard_core::{ChatRequest, ProxyError};

use crate::auth::session_id_from_headers;
use crate::error::ApiError;
use crate::pipeline::{handle_chat_completion, PipelineOutcome, PipelineRequest};
use crate::state::AppState;

/// `POST /v1/chat/completions`
pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let request: ChatRequest = serde_json::from_value(body)
        .map_err(|err| ProxyError::InvalidRequest(format!("Malformed chat request: {err}")))?;

    let inbound = PipelineRequest {
        request,
        session_id: session_id_from_headers(&headers),
        client_host: client_host(&headers),
        request_id: Uuid::new_v4().to_string(),
    };

    match handle_chat_completion(&state, inbound).await? {
        PipelineOutcome::Complete(body) => Ok(Json(body).into_response()),
        PipelineOutcome::Streaming(stream) => Ok(sse_response(stream)),
    }
}

/// `GET /v1/models`
pub async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let data: Vec<Value> = state
        .backends
        .all_models()
        .into_iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "owned_by": "switchboard",
            })
        })
        .collect();
    Json(json!({ "object": "list", "data": data }))
}

/// Relay a byte stream as `text/event-stream`.
///
/// A mid-stream error terminates the stream with a final error `data:`
/// frame instead of tearing the connection down silently.
pub fn sse_response(stream: switchboard_core::capture::ByteStream) -> Response {
    let framed = async_stream::stream! {
        let mut upstream = stream;
        while let Some(item) = upstream.next().await {
            match item {
                Ok(chunk) => yield Ok::<Bytes, std::convert::Infallible>(Bytes::from(chunk)),
                Err(err) => {
                    let frame = format!("data: {}\n\n", err.to_body());
                    yield Ok(Bytes::from(frame));
                    return;
                }
            }
        }
    };
    let body = Body::from_stream(framed);
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

pub fn client_host(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
}
