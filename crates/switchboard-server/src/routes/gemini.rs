//! Gemini-compatible routes
//!
//! The path segment carries both the model and the action
//! (`gemini-2.5-pro:generateContent`). Responses are translated back into
//! the Gemini shape; streamed responses are re-framed as Gemini-shaped
//! chunk objects inside SSE frames.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde_json::{json, Value};
use uuid::Uuid;

use switchboard_core::capture::ByteStream;
use switchboard_core::translation::gemini as translate;
use switchboard_core::{ChatResponse, ProxyError};

use crate::auth::session_id_from_headers;
use crate::error::ApiError;
use crate::pipeline::{handle_chat_completion, PipelineOutcome, PipelineRequest};
use crate::routes::openai::{client_host, sse_response};
use crate::state::AppState;

/// `GET /v1beta/models`
pub async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let models: Vec<Value> = state
        .backends
        .all_models()
        .into_iter()
        .map(|id| {
            json!({
                "name": format!("models/{id}"),
                "display_name": id,
                "supported_generation_methods": ["generateContent", "streamGenerateContent"],
            })
        })
        .collect();
    Json(json!({ "models": models }))
}

/// `POST /v1beta/models/<model>:generateContent` and
/// `POST /v1beta/models/<model>:streamGenerateContent`
pub async fn generate(
    State(state): State<AppState>,
    Path(model_action): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let (model, action) = model_action.split_once(':').ok_or_else(|| {
        ProxyError::InvalidRequest(format!(
            "Expected <model>:generateContent, got '{model_action}'"
        ))
    })?;
    let stream = match action {
        "generateContent" => false,
        "streamGenerateContent" => true,
        other => {
            return Err(
                ProxyError::InvalidRequest(format!("Unsupported action '{other}'")).into(),
            )
        }
    };

    let mut request = translate::request_from_gemini(model, &body)?;
    request.stream = stream;

    let inbound = PipelineRequest {
        request,
        session_id: session_id_from_headers(&headers),
        client_host: client_host(&headers),
        request_id: Uuid::new_v4().to_string(),
    };

    match handle_chat_completion(&state, inbound).await? {
        PipelineOutcome::Complete(body) => {
            let canonical: ChatResponse = serde_json::from_value(body)
                .map_err(|err| ProxyError::Internal(format!("Malformed response body: {err}")))?;
            Ok(Json(translate::response_to_gemini(&canonical)).into_response())
        }
        PipelineOutcome::Streaming(stream) => Ok(sse_response(to_gemini_stream(stream))),
    }
}

/// Re-frame OpenAI-style SSE chunks as Gemini-shaped chunk objects.
///
/// The upstream frames are `data: <chat.completion.chunk>` records ending
/// with `data: [DONE]`; each becomes a `candidates` object carrying the
/// delta text. The `[DONE]` marker is dropped (the Gemini dialect ends the
/// stream by closing it).
fn to_gemini_stream(stream: ByteStream) -> ByteStream {
    Box::pin(async_stream::stream! {
        let mut upstream = stream;
        let mut buffer = String::new();

        while let Some(item) = upstream.next().await {
            let chunk = match item {
                Ok(bytes) => bytes,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(frame_end) = buffer.find("\n\n") {
                let frame: String = buffer.drain(..frame_end + 2).collect();
                let Some(payload) = frame.trim().strip_prefix("data: ") else {
                    continue;
                };
                if payload.trim() == "[DONE]" {
                    continue;
                }
                let Ok(parsed) = serde_json::from_str::<Value>(payload) else {
                    continue;
                };
                let converted = chunk_to_gemini(&parsed);
                yield Ok(format!("data: {converted}\n\n").into_bytes());
            }
        }
    })
}

fn chunk_to_gemini(chunk: &Value) -> Value {
    let delta_text = chunk
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let finish = chunk
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("finish_reason"))
        .and_then(Value::as_str);

    let mut candidate = json!({
        "content": { "parts": [{ "text": delta_text }], "role": "model" },
        "index": 0,
    });
    if let Some(reason) = finish {
        candidate["finishReason"] = match reason {
            "length" => json!("MAX_TOKENS"),
            "content_filter" => json!("SAFETY"),
            _ => json!("STOP"),
        };
    }
    json!({ "candidates": [candidate] })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_to_gemini() {
        let chunk = json!({
            "choices": [{ "delta": { "content": "hi" }, "finish_reason": null }]
        });
        let out = chunk_to_gemini(&chunk);
        assert_eq!(out["candidates"][0]["content"]["parts"][0]["text"], "hi");
        assert!(out["candidates"][0].get("finishReason").is_none());

        let done = json!({
            "choices": [{ "delta": {}, "finish_reason": "stop" }]
        });
        let out = chunk_to_gemini(&done);
        assert_eq!(out["candidates"][0]["finishReason"], "STOP");
    }

    #[tokio::test]
    async fn test_to_gemini_stream_reframes_and_drops_done() {
        let frames: Vec<switchboard_core::Result<Vec<u8>>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n".to_vec()),
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n".to_vec()),
        ];
        let stream: ByteStream = Box::pin(futures::stream::iter(frames));
        let out: Vec<u8> = to_gemini_stream(stream)
            .map(|item| item.unwrap())
            .collect::<Vec<_>>()
            .await
            .concat();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("[DONE]"));
        let frames: Vec<&str> = text.split("\n\n").filter(|f| !f.is_empty()).collect();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("\"text\":\"a\""));
        assert!(!frames[1].contains("MAX_TOKENS"));
        assert!(frames[1].contains("STOP"));
    }
}
