//! Switchboard backends - connectors to upstream LLM providers
//!
//! This crate provides:
//! - The `BackendConnector` capability trait and response envelopes
//! - HTTPS connectors (OpenAI-compatible, Gemini REST, Anthropic)
//! - Subprocess connectors (Gemini CLI batch and interactive)
//! - An OAuth-gated Gemini connector using on-disk credentials
//! - The connector registry, backend service and per-backend key pools

pub mod anthropic;
pub mod connector;
pub mod gemini;
pub mod gemini_cli_batch;
pub mod gemini_cli_interactive;
pub mod gemini_oauth;
pub mod http_client;
pub mod mock;
pub mod openai;
pub mod registry;

pub use anthropic::AnthropicConnector;
pub use connector::{BackendConnector, CallContext, ResponseEnvelope};
pub use gemini::GeminiConnector;
pub use gemini_cli_batch::GeminiCliBatchConnector;
pub use gemini_cli_interactive::GeminiCliInteractiveConnector;
pub use gemini_oauth::GeminiOauthConnector;
pub use mock::MockConnector;
pub use openai::OpenAiConnector;
pub use registry::{BackendService, ConnectorRegistry, KeyPool};
