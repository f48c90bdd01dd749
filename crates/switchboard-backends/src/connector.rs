//! Backend connector trait and shared helpers

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use switchboard_core::capture::ByteStream;
use switchboard_core::{ChatMessage, ChatRequest, ProxyError, Result};

/// Per-call dispatch context.
///
/// API keys travel here, per call; connectors never cache them for routing
/// purposes.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub effective_model: String,
    pub api_key: Option<String>,
    /// Logical key label for observability (`openai-2`), never the key.
    pub key_name: Option<String>,
    pub project: Option<String>,
    pub project_dir: Option<PathBuf>,
    pub agent: Option<String>,
}

/// Connector reply: a complete JSON body or a lazy byte stream.
pub enum ResponseEnvelope {
    Complete {
        body: Value,
        headers: Vec<(String, String)>,
    },
    Streaming(ByteStream),
}

impl std::fmt::Debug for ResponseEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete { body, headers } => f
                .debug_struct("Complete")
                .field("body", body)
                .field("headers", headers)
                .finish(),
            Self::Streaming(_) => f.debug_tuple("Streaming").field(&"<stream>").finish(),
        }
    }
}

impl ResponseEnvelope {
    pub fn complete(body: Value) -> Self {
        Self::Complete {
            body,
            headers: Vec::new(),
        }
    }
}

/// Uniform capability over upstream transports.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Backend name as used in `backend:model` route elements.
    fn name(&self) -> &str;

    /// Perform discovery and populate the model list. A connector that
    /// fails to initialize stays non-functional and is excluded from
    /// dispatch.
    async fn initialize(&self) -> Result<()>;

    fn is_functional(&self) -> bool;

    /// Cached model list; the exact set considered valid for this backend.
    fn available_models(&self) -> Vec<String>;

    async fn chat_completions(
        &self,
        request: &ChatRequest,
        messages: &[ChatMessage],
        call: &CallContext,
    ) -> Result<ResponseEnvelope>;

    /// Release owned resources (child processes, pipes) at shutdown.
    async fn shutdown(&self) {}
}

/// Map an upstream HTTP error response to a typed error.
///
/// 429 becomes `RateLimit` with the parsed `Retry-After`; everything else
/// is a `Backend` error carrying the upstream status and a truncated body.
pub async fn response_to_error(backend: &str, response: reqwest::Response) -> ProxyError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    let message = truncate_body(&body);

    if status == 429 {
        return ProxyError::RateLimit {
            message: format!("{backend}: {message}"),
            retry_after_secs: retry_after,
        };
    }

    ProxyError::Backend {
        backend: backend.to_string(),
        status,
        message,
        retry_after_secs: retry_after,
    }
}

/// Map a transport-level failure to `ServiceUnavailable`.
pub fn transport_error(backend: &str, err: reqwest::Error) -> ProxyError {
    ProxyError::ServiceUnavailable(format!("Could not reach {backend}: {err}"))
}

// Truncate error bodies so large or sensitive responses don't leak whole.
const MAX_ERROR_BODY: usize = 512;

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let cut = body
        .char_indices()
        .take_while(|(idx, _)| *idx < MAX_ERROR_BODY)
        .last()
        .map(|(idx, c)| idx + c.len_utf8())
        .unwrap_or(0);
    format!("{}... [truncated]", &body[..cut])
}

/// SSE frame for one JSON payload.
pub fn sse_frame(payload: &Value) -> Vec<u8> {
    format!("data: {payload}\n\n").into_bytes()
}

/// The terminating SSE frame.
pub fn sse_done() -> Vec<u8> {
    b"data: [DONE]\n\n".to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body_on_char_boundary() {
        let body = "é".repeat(600);
        let out = truncate_body(&body);
        assert!(out.ends_with("... [truncated]"));
        assert!(out.len() < body.len());
    }

    #[test]
    fn test_sse_frames() {
        let frame = sse_frame(&serde_json::json!({"a": 1}));
        assert_eq!(frame, b"data: {\"a\":1}\n\n".to_vec());
        assert_eq!(sse_done(), b"data: [DONE]\n\n".to_vec());
    }
}
