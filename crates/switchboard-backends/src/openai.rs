//! OpenAI-compatible HTTPS connector
//!
//! Serves any provider speaking the OpenAI chat-completions dialect; the
//! base URL comes from the backend config. Streaming responses are SSE
//! passthrough.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use switchboard_core::translation::openai as translate;
use switchboard_core::{ChatMessage, ChatRequest, ProxyError, Result};

use crate::connector::{
    response_to_error, transport_error, BackendConnector, CallContext, ResponseEnvelope,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiConnector {
    name: String,
    client: Client,
    base_url: String,
    /// Key used only for model discovery at initialize time.
    discovery_key: Option<String>,
    static_models: Vec<String>,
    models: RwLock<Vec<String>>,
    functional: AtomicBool,
}

impl OpenAiConnector {
    pub fn new(name: impl Into<String>, client: Client) -> Self {
        Self {
            name: name.into(),
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            discovery_key: None,
            static_models: Vec::new(),
            models: RwLock::new(Vec::new()),
            functional: AtomicBool::new(false),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_discovery_key(mut self, key: Option<String>) -> Self {
        self.discovery_key = key;
        self
    }

    pub fn with_static_models(mut self, models: Vec<String>) -> Self {
        self.static_models = models;
        self
    }

    async fn discover_models(&self) -> Result<Vec<String>> {
        let mut request = self.client.get(format!("{}/models", self.base_url));
        if let Some(key) = &self.discovery_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|err| transport_error(&self.name, err))?;
        if !response.status().is_success() {
            return Err(response_to_error(&self.name, response).await);
        }
        let body: Value = response
            .json()
            .await
            .map_err(|err| transport_error(&self.name, err))?;
        let models = body
            .get("data")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }
}

#[async_trait]
impl BackendConnector for OpenAiConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<()> {
        let discovered = match self.discover_models().await {
            Ok(models) if !models.is_empty() => models,
            Ok(_) => self.static_models.clone(),
            Err(err) => {
                if self.static_models.is_empty() {
                    warn!(backend = %self.name, error = %err, "Model discovery failed");
                    return Err(err);
                }
                debug!(backend = %self.name, error = %err, "Model discovery failed, using configured list");
                self.static_models.clone()
            }
        };

        let functional = !discovered.is_empty();
        *self.models.write() = discovered;
        self.functional.store(functional, Ordering::SeqCst);
        Ok(())
    }

    fn is_functional(&self) -> bool {
        self.functional.load(Ordering::SeqCst)
    }

    fn available_models(&self) -> Vec<String> {
        self.models.read().clone()
    }

    async fn chat_completions(
        &self,
        request: &ChatRequest,
        messages: &[ChatMessage],
        call: &CallContext,
    ) -> Result<ResponseEnvelope> {
        let body = translate::request_to_openai(request, messages, &call.effective_model, request.stream)?;

        let mut upstream = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &call.api_key {
            upstream = upstream.bearer_auth(key);
        }

        let response = upstream
            .send()
            .await
            .map_err(|err| transport_error(&self.name, err))?;
        if !response.status().is_success() {
            return Err(response_to_error(&self.name, response).await);
        }

        if request.stream {
            let backend = self.name.clone();
            let byte_stream = response.bytes_stream().map(move |chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|err| ProxyError::ServiceUnavailable(format!(
                        "{backend} stream interrupted: {err}"
                    )))
            });
            return Ok(ResponseEnvelope::Streaming(Box::pin(byte_stream)));
        }

        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter(|(name, _)| {
                let name = name.as_str();
                name == "x-request-id" || name.starts_with("x-ratelimit-")
            })
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();

        let value: Value = response
            .json()
            .await
            .map_err(|err| transport_error(&self.name, err))?;
        // Validate the shape before passing it along.
        let canonical = translate::response_from_openai(value)?;
        Ok(ResponseEnvelope::Complete {
            body: serde_json::to_value(&canonical)?,
            headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::ChatMessage;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(stream: bool) -> ChatRequest {
        ChatRequest {
            model: "gpt-4".to_string(),
            messages: vec![ChatMessage::user("hello")],
            stream,
            ..Default::default()
        }
    }

    fn call() -> CallContext {
        CallContext {
            effective_model: "gpt-4".to_string(),
            api_key: Some("sk-test".to_string()),
            key_name: Some("openai-1".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_initialize_discovers_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"id": "gpt-4"}, {"id": "gpt-4o-mini"}]
            })))
            .mount(&server)
            .await;

        let connector = OpenAiConnector::new("openai", Client::new())
            .with_base_url(server.uri())
            .with_discovery_key(Some("sk-test".to_string()));
        connector.initialize().await.unwrap();
        assert!(connector.is_functional());
        assert_eq!(connector.available_models(), vec!["gpt-4", "gpt-4o-mini"]);
    }

    #[tokio::test]
    async fn test_initialize_falls_back_to_static_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let connector = OpenAiConnector::new("openai", Client::new())
            .with_base_url(server.uri())
            .with_static_models(vec!["gpt-4".to_string()]);
        connector.initialize().await.unwrap();
        assert!(connector.is_functional());
        assert_eq!(connector.available_models(), vec!["gpt-4"]);
    }

    #[tokio::test]
    async fn test_chat_completion_passes_key_per_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({"model": "gpt-4"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "created": 1700000000,
                "model": "gpt-4",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "hi"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
            })))
            .mount(&server)
            .await;

        let connector = OpenAiConnector::new("openai", Client::new()).with_base_url(server.uri());
        let envelope = connector
            .chat_completions(&request(false), &request(false).messages, &call())
            .await
            .unwrap();
        match envelope {
            ResponseEnvelope::Complete { body, .. } => {
                assert_eq!(body["choices"][0]["message"]["content"], "hi");
            }
            _ => panic!("expected complete response"),
        }
    }

    #[tokio::test]
    async fn test_upstream_error_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "7")
                    .set_body_string("slow down"),
            )
            .mount(&server)
            .await;

        let connector = OpenAiConnector::new("openai", Client::new()).with_base_url(server.uri());
        let err = connector
            .chat_completions(&request(false), &request(false).messages, &call())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::RateLimit { .. }));
        assert_eq!(err.retry_after(), Some(7));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_streaming_passthrough() {
        use futures::StreamExt;

        let server = MockServer::start().await;
        let sse_body = "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n";
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body),
            )
            .mount(&server)
            .await;

        let connector = OpenAiConnector::new("openai", Client::new()).with_base_url(server.uri());
        let envelope = connector
            .chat_completions(&request(true), &request(true).messages, &call())
            .await
            .unwrap();
        let ResponseEnvelope::Streaming(stream) = envelope else {
            panic!("expected streaming response");
        };
        let collected: Vec<u8> = stream
            .map(|chunk| chunk.unwrap())
            .collect::<Vec<_>>()
            .await
            .concat();
        assert_eq!(String::from_utf8(collected).unwrap(), sse_body);
    }
}
