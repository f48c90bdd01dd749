//! Mock connector for tests
//!
//! Scripted replies plus a record of every call, so pipeline tests can
//! assert dispatch behavior without touching the network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use switchboard_core::{ChatMessage, ChatRequest, ProxyError, Result};

use crate::connector::{BackendConnector, CallContext, ResponseEnvelope};
use crate::gemini_cli_batch::build_prompt;

/// One scripted reply.
pub enum MockReply {
    Text(String),
    Stream(Vec<Vec<u8>>),
    Failure { status: u16, message: String },
    Unavailable(String),
}

/// What the connector observed for one call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub model: String,
    pub key_name: Option<String>,
    pub api_key: Option<String>,
    pub prompt: String,
    pub stream: bool,
}

pub struct MockConnector {
    name: String,
    models: Vec<String>,
    replies: Mutex<VecDeque<MockReply>>,
    calls: Mutex<Vec<MockCall>>,
    functional: AtomicBool,
}

impl MockConnector {
    pub fn new(name: impl Into<String>, models: Vec<String>) -> Self {
        Self {
            name: name.into(),
            models,
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            functional: AtomicBool::new(true),
        }
    }

    pub fn push_reply(&self, reply: MockReply) {
        self.replies.lock().push_back(reply);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl BackendConnector for MockConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<()> {
        self.functional.store(!self.models.is_empty(), Ordering::SeqCst);
        Ok(())
    }

    fn is_functional(&self) -> bool {
        self.functional.load(Ordering::SeqCst)
    }

    fn available_models(&self) -> Vec<String> {
        self.models.clone()
    }

    async fn chat_completions(
        &self,
        request: &ChatRequest,
        messages: &[ChatMessage],
        call: &CallContext,
    ) -> Result<ResponseEnvelope> {
        self.calls.lock().push(MockCall {
            model: call.effective_model.clone(),
            key_name: call.key_name.clone(),
            api_key: call.api_key.clone(),
            prompt: build_prompt(messages),
            stream: request.stream,
        });

        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| MockReply::Text("mock response".to_string()));

        match reply {
            MockReply::Text(content) => Ok(ResponseEnvelope::complete(json!({
                "id": "chatcmpl-mock",
                "object": "chat.completion",
                "created": chrono::Utc::now().timestamp(),
                "model": call.effective_model,
                "choices": [{
                    "index": 0,
                    "message": { "role": "assistant", "content": content },
                    "finish_reason": "stop",
                }],
                "usage": { "prompt_tokens": 7, "completion_tokens": 5, "total_tokens": 12 },
            }))),
            MockReply::Stream(chunks) => {
                let items: Vec<Result<Vec<u8>>> = chunks.into_iter().map(Ok).collect();
                Ok(ResponseEnvelope::Streaming(Box::pin(
                    futures::stream::iter(items),
                )))
            }
            MockReply::Failure { status, message } => Err(ProxyError::Backend {
                backend: self.name.clone(),
                status,
                message,
                retry_after_secs: None,
            }),
            MockReply::Unavailable(message) => Err(ProxyError::ServiceUnavailable(message)),
        }
    }
}
