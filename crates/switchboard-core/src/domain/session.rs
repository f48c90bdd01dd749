//! Session and immutable session state
//!
//! `SessionState` is a value type: every `with_*` transition returns a new
//! state and leaves the original untouched. Command handlers return the new
//! state inside their `CommandResult` and the caller installs it back into
//! the session through the store.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::chat::{ChatMessage, Usage};
use crate::failover::{FailoverPolicy, FailoverRoute};
use crate::loop_detection::ToolLoopStreak;

/// Detected identity of the calling client.
///
/// Cline expects command replies wrapped in a synthetic `tool_calls`
/// response; everyone else gets a plain assistant message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Agent {
    Cline,
    Generic,
}

impl Agent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Agent::Cline => "cline",
            Agent::Generic => "generic",
        }
    }

    /// Heuristic detection from message content.
    pub fn detect(messages: &[ChatMessage]) -> Option<Agent> {
        for message in messages {
            if let Some(content) = &message.content {
                let text = content.joined_text();
                if text.contains("<attempt_completion>") {
                    return Some(Agent::Cline);
                }
            }
        }
        None
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasoning effort level accepted by `set(reasoning-effort=…)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
    None,
}

impl ReasoningEffort {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "none" => Some(Self::None),
            _ => Option::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::None => "none",
        }
    }
}

/// Tool-loop detection mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolLoopMode {
    None,
    #[default]
    Simple,
}

impl ToolLoopMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "none" => Some(Self::None),
            "simple" => Some(Self::Simple),
            _ => Option::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Simple => "simple",
        }
    }

    pub const VALID_MODES: &'static str = "none, simple";
}

/// Backend routing overrides held by the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BackendSettings {
    pub backend_type: Option<String>,
    pub model: Option<String>,
    pub failover_routes: BTreeMap<String, FailoverRoute>,
}

impl BackendSettings {
    pub fn with_backend(&self, backend: Option<String>) -> Self {
        let mut next = self.clone();
        next.backend_type = backend;
        next
    }

    pub fn with_model(&self, model: Option<String>) -> Self {
        let mut next = self.clone();
        next.model = model;
        next
    }

    pub fn with_failover_route(&self, name: impl Into<String>, policy: FailoverPolicy) -> Self {
        let mut next = self.clone();
        next.failover_routes.insert(
            name.into(),
            FailoverRoute {
                policy,
                elements: Vec::new(),
            },
        );
        next
    }

    pub fn without_failover_route(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.failover_routes.remove(name);
        next
    }

    pub fn with_appended_route_element(&self, name: &str, element: impl Into<String>) -> Self {
        let mut next = self.clone();
        if let Some(route) = next.failover_routes.get_mut(name) {
            route.elements.push(element.into());
        }
        next
    }

    pub fn with_prepended_route_element(&self, name: &str, element: impl Into<String>) -> Self {
        let mut next = self.clone();
        if let Some(route) = next.failover_routes.get_mut(name) {
            route.elements.insert(0, element.into());
        }
        next
    }

    pub fn with_cleared_route(&self, name: &str) -> Self {
        let mut next = self.clone();
        if let Some(route) = next.failover_routes.get_mut(name) {
            route.elements.clear();
        }
        next
    }
}

/// Generation/reasoning parameters held by the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ReasoningSettings {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub thinking_budget: Option<u32>,
}

/// Loop-detection configuration held by the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoopSettings {
    pub loop_detection_enabled: bool,
    pub tool_loop_detection_enabled: bool,
    pub tool_loop_mode: ToolLoopMode,
    pub tool_loop_max_repeats: u32,
    pub tool_loop_ttl_seconds: u64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            loop_detection_enabled: true,
            tool_loop_detection_enabled: true,
            tool_loop_mode: ToolLoopMode::Simple,
            tool_loop_max_repeats: 4,
            tool_loop_ttl_seconds: 120,
        }
    }
}

/// Immutable session state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionState {
    pub backend_config: BackendSettings,
    pub reasoning_config: ReasoningSettings,
    pub loop_config: LoopSettings,
    pub project: Option<String>,
    pub project_dir: Option<PathBuf>,
    pub provider: Option<String>,
    /// Overrides the global redaction toggle for this session when set.
    pub redact_api_keys_in_prompts: Option<bool>,
    pub pytest_compression_enabled: bool,
    pub pytest_compression_min_lines: Option<usize>,
    /// One-shot: compress the next tool-call reply, then reset.
    pub compress_next_tool_call_reply: bool,
    /// One-shot: set by the `hello` command, consumed by the banner.
    pub hello_requested: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            pytest_compression_enabled: true,
            ..Default::default()
        }
    }

    pub fn with_backend_config(&self, backend_config: BackendSettings) -> Self {
        let mut next = self.clone();
        next.backend_config = backend_config;
        next
    }

    pub fn with_backend(&self, backend: Option<String>) -> Self {
        self.with_backend_config(self.backend_config.with_backend(backend))
    }

    pub fn with_model(&self, model: Option<String>) -> Self {
        self.with_backend_config(self.backend_config.with_model(model))
    }

    pub fn with_reasoning_config(&self, reasoning_config: ReasoningSettings) -> Self {
        let mut next = self.clone();
        next.reasoning_config = reasoning_config;
        next
    }

    pub fn with_temperature(&self, temperature: Option<f64>) -> Self {
        let mut reasoning = self.reasoning_config.clone();
        reasoning.temperature = temperature;
        self.with_reasoning_config(reasoning)
    }

    pub fn with_top_p(&self, top_p: Option<f64>) -> Self {
        let mut reasoning = self.reasoning_config.clone();
        reasoning.top_p = top_p;
        self.with_reasoning_config(reasoning)
    }

    pub fn with_reasoning_effort(&self, effort: Option<ReasoningEffort>) -> Self {
        let mut reasoning = self.reasoning_config.clone();
        reasoning.reasoning_effort = effort;
        self.with_reasoning_config(reasoning)
    }

    pub fn with_thinking_budget(&self, budget: Option<u32>) -> Self {
        let mut reasoning = self.reasoning_config.clone();
        reasoning.thinking_budget = budget;
        self.with_reasoning_config(reasoning)
    }

    /// Install every field a reasoning mode defines, keeping the rest.
    pub fn with_reasoning_mode(&self, mode: &crate::config::ReasoningMode) -> Self {
        let mut reasoning = self.reasoning_config.clone();
        if mode.temperature.is_some() {
            reasoning.temperature = mode.temperature;
        }
        if mode.top_p.is_some() {
            reasoning.top_p = mode.top_p;
        }
        if mode.reasoning_effort.is_some() {
            reasoning.reasoning_effort = mode.reasoning_effort;
        }
        if mode.thinking_budget.is_some() {
            reasoning.thinking_budget = mode.thinking_budget;
        }
        self.with_reasoning_config(reasoning)
    }

    pub fn with_loop_config(&self, loop_config: LoopSettings) -> Self {
        let mut next = self.clone();
        next.loop_config = loop_config;
        next
    }

    pub fn with_project(&self, project: Option<String>) -> Self {
        let mut next = self.clone();
        next.project = project;
        next
    }

    pub fn with_project_dir(&self, project_dir: Option<PathBuf>) -> Self {
        let mut next = self.clone();
        next.project_dir = project_dir;
        next
    }

    pub fn with_provider(&self, provider: Option<String>) -> Self {
        let mut next = self.clone();
        next.provider = provider;
        next
    }

    pub fn with_redaction_enabled(&self, enabled: Option<bool>) -> Self {
        let mut next = self.clone();
        next.redact_api_keys_in_prompts = enabled;
        next
    }

    pub fn with_pytest_compression(&self, enabled: bool) -> Self {
        let mut next = self.clone();
        next.pytest_compression_enabled = enabled;
        next
    }

    pub fn with_pytest_compression_min_lines(&self, min_lines: Option<usize>) -> Self {
        let mut next = self.clone();
        next.pytest_compression_min_lines = min_lines;
        next
    }

    pub fn with_compress_next_tool_call_reply(&self, enabled: bool) -> Self {
        let mut next = self.clone();
        next.compress_next_tool_call_reply = enabled;
        next
    }

    pub fn with_hello_requested(&self, requested: bool) -> Self {
        let mut next = self.clone();
        next.hello_requested = requested;
        next
    }
}

/// Which side produced a history entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InteractionHandler {
    /// The proxy answered directly (command-only request).
    Proxy,
    /// The request was forwarded to an upstream backend.
    Backend,
}

/// One observed request/response pair on a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInteraction {
    pub handler: InteractionHandler,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Mutable per-client context keyed by session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub state: SessionState,
    pub history: Vec<SessionInteraction>,
    pub agent: Option<Agent>,
    /// Tool-call streak tracked by loop detection across requests.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_loop_streak: Option<ToolLoopStreak>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            state: SessionState::new(),
            history: Vec::new(),
            agent: None,
            tool_loop_streak: None,
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn is_cline(&self) -> bool {
        self.agent == Some(Agent::Cline)
    }

    /// Model currently selected for this session, if any.
    pub fn model(&self) -> Option<&str> {
        self.state.backend_config.model.as_deref()
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    pub fn record_interaction(&mut self, interaction: SessionInteraction) {
        self.history.push(interaction);
        self.touch();
    }
}
