//! Switchboard core - domain model and services for the interactive LLM proxy
//!
//! This crate provides:
//! - Canonical chat request/response types shared by all wire formats
//! - Session state machine with immutable `with_*` transitions
//! - Inline command system (parser, registry, handlers, service)
//! - API key redaction and the emergency command filter
//! - Wire capture sinks (buffered and structured)
//! - Failover route planning
//! - Translation between the canonical format and provider wire formats

pub mod capture;
pub mod commands;
pub mod config;
pub mod domain;
pub mod error;
pub mod failover;
pub mod loop_detection;
pub mod middleware;
pub mod redaction;
pub mod response;
pub mod session;
pub mod translation;
pub mod util;

// Re-export commonly used types
pub use commands::{
    Command, CommandHandler, CommandIntrospection, CommandParser, CommandRegistry, CommandResult,
    CommandService, HandlerContext, LegacyCommandRegistry, ProcessedResult,
};
pub use config::{AppConfig, BackendSection, CliOverrides, ModelReasoningAliases, ReasoningMode};
pub use domain::chat::{
    ChatMessage, ChatRequest, ChatResponse, Choice, ContentPart, FunctionCall, MessageContent,
    ResponseMessage, Role, ToolCall, Usage,
};
pub use domain::session::{
    Agent, BackendSettings, InteractionHandler, LoopSettings, ReasoningEffort, ReasoningSettings,
    Session, SessionInteraction, SessionState, ToolLoopMode,
};
pub use error::{ProxyError, Result};
pub use failover::{FailoverAttempt, FailoverPolicy, FailoverPlanner, FailoverRoute};
pub use redaction::{ApiKeyRedactor, ProxyCommandFilter, SecretRegistry, REDACTION_MASK};
pub use session::store::{InMemorySessionStore, SessionStore};
