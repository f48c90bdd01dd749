//! OpenAI-compatible wire format translation

use serde_json::Value;

use crate::domain::chat::{ChatMessage, ChatRequest, ChatResponse};
use crate::error::{ProxyError, Result};

/// Build the outbound OpenAI-compatible request body.
///
/// The canonical request already has the right shape; this replaces the
/// model and messages with the processed values and pins the stream flag.
pub fn request_to_openai(
    request: &ChatRequest,
    messages: &[ChatMessage],
    effective_model: &str,
    stream: bool,
) -> Result<Value> {
    let mut outbound = request.clone();
    outbound.model = effective_model.to_string();
    outbound.messages = messages.to_vec();
    outbound.stream = stream;
    Ok(serde_json::to_value(&outbound)?)
}

/// Parse an OpenAI-compatible response body into the canonical response.
pub fn response_from_openai(value: Value) -> Result<ChatResponse> {
    serde_json::from_value(value)
        .map_err(|err| ProxyError::Internal(format!("Malformed OpenAI response: {err}")))
}
