//! Gemini REST connector
//!
//! Non-streaming calls hit `:generateContent`; streaming calls hit
//! `:streamGenerateContent`, which returns a JSON array of objects. The
//! stream decoder consumes the `[`, `,` and `]` delimiters with a running
//! buffer and converts each object into an OpenAI-style
//! `chat.completion.chunk` frame, terminated by `data: [DONE]`.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use switchboard_core::capture::ByteStream;
use switchboard_core::translation::gemini as translate;
use switchboard_core::{ChatMessage, ChatRequest, ProxyError, Result};

use crate::connector::{
    response_to_error, sse_done, sse_frame, transport_error, BackendConnector, CallContext,
    ResponseEnvelope,
};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiConnector {
    name: String,
    client: Client,
    base_url: String,
    discovery_key: Option<String>,
    static_models: Vec<String>,
    models: RwLock<Vec<String>>,
    functional: AtomicBool,
}

impl GeminiConnector {
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
            request = request.header("x-goog-api-key", key);
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
            .get("models")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.get("name").and_then(Value::as_str))
                    .map(|name| name.strip_prefix("models/").unwrap_or(name).to_string())
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }
}

#[async_trait]
impl BackendConnector for GeminiConnector {
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
        let body = translate::request_to_gemini(request, messages);
        let verb = if request.stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let url = format!("{}/models/{}:{verb}", self.base_url, call.effective_model);

        let mut upstream = self.client.post(url).json(&body);
        if let Some(key) = &call.api_key {
            upstream = upstream.header("x-goog-api-key", key);
        }

        let response = upstream
            .send()
            .await
            .map_err(|err| transport_error(&self.name, err))?;
        if !response.status().is_success() {
            return Err(response_to_error(&self.name, response).await);
        }

        if request.stream {
            return Ok(ResponseEnvelope::Streaming(convert_stream(
                response,
                self.name.clone(),
                call.effective_model.clone(),
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|err| transport_error(&self.name, err))?;
        let id = format!("chatcmpl-{}", Uuid::new_v4().simple());
        let canonical = translate::response_from_gemini(&data, &call.effective_model, &id);
        Ok(ResponseEnvelope::complete(serde_json::to_value(&canonical)?))
    }
}

/// Convert the upstream JSON-array stream to SSE chunk frames.
fn convert_stream(response: reqwest::Response, backend: String, model: String) -> ByteStream {
    let id = format!("chatcmpl-{}", Uuid::new_v4().simple());
    let created = chrono::Utc::now().timestamp();

    Box::pin(async_stream::stream! {
        let mut upstream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = upstream.next().await {
            let chunk = match chunk {
                Ok(bytes) => bytes,
                Err(err) => {
                    yield Err(ProxyError::ServiceUnavailable(format!(
                        "{backend} stream interrupted: {err}"
                    )));
                    return;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            for object in drain_objects(&mut buffer) {
                let frame = translate::stream_chunk_from_gemini(&object, &model, &id, created);
                yield Ok(sse_frame(&frame));
            }
        }

        for object in drain_objects(&mut buffer) {
            let frame = translate::stream_chunk_from_gemini(&object, &model, &id, created);
            yield Ok(sse_frame(&frame));
        }
        yield Ok(sse_done());
    })
}

/// Pop every complete JSON object off the front of the buffer, consuming
/// surrounding array delimiters.
fn drain_objects(buffer: &mut String) -> Vec<Value> {
    let mut objects = Vec::new();
    loop {
        let skipped = buffer
            .find(|c: char| !(c.is_whitespace() || c == '[' || c == ',' || c == ']'))
            .unwrap_or(buffer.len());
        buffer.drain(..skipped);
        if buffer.is_empty() {
            break;
        }

        let mut iter = serde_json::Deserializer::from_str(buffer).into_iter::<Value>();
        match iter.next() {
            Some(Ok(value)) => {
                let consumed = iter.byte_offset();
                buffer.drain(..consumed);
                objects.push(value);
            }
            _ => break,
        }
    }
    objects
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_drain_objects_across_partial_chunks() {
        let mut buffer = String::from("[{\"a\":1},");
        let first = drain_objects(&mut buffer);
        assert_eq!(first, vec![serde_json::json!({"a":1})]);
        assert!(buffer.is_empty());

        buffer.push_str("{\"b\":");
        assert!(drain_objects(&mut buffer).is_empty());
        buffer.push_str("2}]");
        let second = drain_objects(&mut buffer);
        assert_eq!(second, vec![serde_json::json!({"b":2})]);
    }

    #[tokio::test]
    async fn test_initialize_strips_models_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [
                    {"name": "models/gemini-2.5-pro"},
                    {"name": "models/gemini-2.5-flash"}
                ]
            })))
            .mount(&server)
            .await;

        let connector = GeminiConnector::new("gemini", Client::new())
            .with_base_url(server.uri())
            .with_discovery_key(Some("g-key".to_string()));
        connector.initialize().await.unwrap();
        assert_eq!(
            connector.available_models(),
            vec!["gemini-2.5-pro", "gemini-2.5-flash"]
        );
    }

    #[tokio::test]
    async fn test_generate_content_roundtrip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.5-pro:generateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .and(body_partial_json(serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": "hello"}]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": {"parts": [{"text": "hi"}], "role": "model"},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 1, "candidatesTokenCount": 1}
            })))
            .mount(&server)
            .await;

        let connector = GeminiConnector::new("gemini", Client::new()).with_base_url(server.uri());
        let request = ChatRequest {
            model: "gemini-2.5-pro".to_string(),
            messages: vec![ChatMessage::user("hello")],
            ..Default::default()
        };
        let call = CallContext {
            effective_model: "gemini-2.5-pro".to_string(),
            api_key: Some("g-key".to_string()),
            ..Default::default()
        };
        let envelope = connector
            .chat_completions(&request, &request.messages, &call)
            .await
            .unwrap();
        match envelope {
            ResponseEnvelope::Complete { body, .. } => {
                assert_eq!(body["choices"][0]["message"]["content"], "hi");
                assert_eq!(body["object"], "chat.completion");
            }
            _ => panic!("expected complete response"),
        }
    }

    #[tokio::test]
    async fn test_stream_converted_to_openai_chunks() {
        use futures::StreamExt;

        let server = MockServer::start().await;
        let upstream_body = concat!(
            "[{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"one\"}]}}]},",
            "{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"two\"}]},\"finishReason\":\"STOP\"}]}]"
        );
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.5-pro:streamGenerateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_string(upstream_body))
            .mount(&server)
            .await;

        let connector = GeminiConnector::new("gemini", Client::new()).with_base_url(server.uri());
        let request = ChatRequest {
            model: "gemini-2.5-pro".to_string(),
            messages: vec![ChatMessage::user("hello")],
            stream: true,
            ..Default::default()
        };
        let call = CallContext {
            effective_model: "gemini-2.5-pro".to_string(),
            api_key: Some("g-key".to_string()),
            ..Default::default()
        };
        let ResponseEnvelope::Streaming(stream) = connector
            .chat_completions(&request, &request.messages, &call)
            .await
            .unwrap()
        else {
            panic!("expected streaming response");
        };

        let bytes: Vec<u8> = stream
            .map(|chunk| chunk.unwrap())
            .collect::<Vec<_>>()
            .await
            .concat();
        let text = String::from_utf8(bytes).unwrap();
        let frames: Vec<&str> = text.split("\n\n").filter(|f| !f.is_empty()).collect();
        assert_eq!(frames.len(), 3);
        assert!(frames[0].contains("\"content\":\"one\""));
        assert!(frames[1].contains("\"content\":\"two\""));
        assert_eq!(frames[2], "data: [DONE]");

        let first: Value =
            serde_json::from_str(frames[0].strip_prefix("data: ").unwrap()).unwrap();
        assert_eq!(first["object"], "chat.completion.chunk");
    }
}
