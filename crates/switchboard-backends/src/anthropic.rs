//! Anthropic HTTPS connector

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;
use tracing::warn;

use switchboard_core::translation::anthropic as translate;
use switchboard_core::{ChatMessage, ChatRequest, Result};

use crate::connector::{
    response_to_error, transport_error, BackendConnector, CallContext, ResponseEnvelope,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicConnector {
    name: String,
    client: Client,
    base_url: String,
    discovery_key: Option<String>,
    static_models: Vec<String>,
    models: RwLock<Vec<String>>,
    functional: AtomicBool,
}

impl AnthropicConnector {
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

    fn auth_headers(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(key) {
            headers.insert(HeaderName::from_static("x-api-key"), value);
        }
        headers.insert(
            HeaderName::from_static("anthropic-version"),
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    async fn discover_models(&self) -> Result<Vec<String>> {
        let Some(key) = &self.discovery_key else {
            return Ok(Vec::new());
        };
        let response = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .headers(Self::auth_headers(key))
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
        Ok(body
            .get("data")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl BackendConnector for AnthropicConnector {
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
        let body =
            translate::request_to_anthropic(request, messages, &call.effective_model, false)?;

        let mut upstream = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .json(&body);
        if let Some(key) = &call.api_key {
            upstream = upstream.headers(Self::auth_headers(key));
        }

        let response = upstream
            .send()
            .await
            .map_err(|err| transport_error(&self.name, err))?;
        if !response.status().is_success() {
            return Err(response_to_error(&self.name, response).await);
        }

        let data: Value = response
            .json()
            .await
            .map_err(|err| transport_error(&self.name, err))?;
        let canonical = translate::response_from_anthropic(data)?;
        Ok(ResponseEnvelope::complete(serde_json::to_value(&canonical)?))
    }
}
