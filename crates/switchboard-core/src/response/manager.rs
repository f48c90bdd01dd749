//! Response manager and agent formatter
//!
//! Packages a command result as the response envelope the detected agent
//! expects: Cline gets a synthetic `tool_calls` response, everyone else a
//! plain assistant message.

use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::commands::command::CommandResult;
use crate::commands::service::ProcessedResult;
use crate::domain::chat::{ChatResponse, Choice, ResponseMessage, Role, ToolCall, Usage};
use crate::domain::session::Session;
use crate::response::pytest;

/// Response id used for locally answered command requests.
const COMMAND_RESPONSE_ID: &str = "proxy_cmd_processed";
/// Model label on synthesized responses.
const PROXY_MODEL: &str = "switchboard";

#[derive(Default)]
pub struct ResponseManager;

impl ResponseManager {
    pub fn new() -> Self {
        Self
    }

    /// Render a command-only request's reply.
    pub fn process_command_result(
        &self,
        processed: &ProcessedResult,
        session: &Session,
    ) -> ChatResponse {
        match processed.command_results.first() {
            Some(result) => self.format_for_agent(result, session),
            None => ChatResponse::assistant_text(COMMAND_RESPONSE_ID, PROXY_MODEL, ""),
        }
    }

    /// Format one command result for the session's detected agent.
    pub fn format_for_agent(&self, result: &CommandResult, session: &Session) -> ChatResponse {
        let command_name = result.name.as_deref().unwrap_or("unknown_command");
        let message = pytest::maybe_compress(command_name, &result.message, session);

        if session.is_cline() {
            debug!(command = command_name, "Formatting command reply as Cline tool call");
            let encoded = serde_json::to_string(&json!(message)).unwrap_or_default();
            let arguments = format!("{{\"result\": {encoded}}}");
            return tool_calls_response(command_name, arguments);
        }

        ChatResponse::assistant_text(COMMAND_RESPONSE_ID, PROXY_MODEL, message)
    }
}

fn tool_calls_response(command_name: &str, arguments: String) -> ChatResponse {
    ChatResponse {
        id: COMMAND_RESPONSE_ID.to_string(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: PROXY_MODEL.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: Role::Assistant,
                content: None,
                tool_calls: Some(vec![ToolCall::function(
                    format!("call_{}", &Uuid::new_v4().simple().to_string()[..16]),
                    command_name,
                    arguments,
                )]),
            },
            finish_reason: Some("tool_calls".to_string()),
        }],
        usage: Usage::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::Agent;

    fn processed(result: CommandResult) -> ProcessedResult {
        ProcessedResult {
            modified_messages: Vec::new(),
            command_executed: true,
            command_results: vec![result],
        }
    }

    #[test]
    fn test_plain_agent_gets_assistant_message() {
        let manager = ResponseManager::new();
        let session = Session::new("s1");
        let response = manager.process_command_result(
            &processed(CommandResult::ok("Model changed to gpt-4").named("model")),
            &session,
        );
        let choice = &response.choices[0];
        assert_eq!(choice.message.content.as_deref(), Some("Model changed to gpt-4"));
        assert!(choice.message.tool_calls.is_none());
        assert_eq!(choice.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.object, "chat.completion");
    }

    #[test]
    fn test_cline_agent_gets_tool_calls_envelope() {
        let manager = ResponseManager::new();
        let mut session = Session::new("s1");
        session.agent = Some(Agent::Cline);

        let response = manager.process_command_result(
            &processed(CommandResult::ok("welcome").named("hello")),
            &session,
        );
        let choice = &response.choices[0];
        assert!(choice.message.content.is_none());
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));

        let calls = choice.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "hello");
        assert_eq!(calls[0].function.arguments, "{\"result\": \"welcome\"}");
        assert!(calls[0].id.starts_with("call_"));
    }

    #[test]
    fn test_failure_rendered_like_success() {
        let manager = ResponseManager::new();
        let mut session = Session::new("s1");
        session.agent = Some(Agent::Cline);

        let response = manager.process_command_result(
            &processed(CommandResult::fail("Unknown parameter: zap").named("set")),
            &session,
        );
        let calls = response.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "set");
        assert!(calls[0].function.arguments.contains("Unknown parameter: zap"));
    }

    #[test]
    fn test_empty_results_yield_empty_reply() {
        let manager = ResponseManager::new();
        let session = Session::new("s1");
        let response = manager.process_command_result(
            &ProcessedResult {
                modified_messages: Vec::new(),
                command_executed: true,
                command_results: Vec::new(),
            },
            &session,
        );
        assert_eq!(response.choices[0].message.content.as_deref(), Some(""));
    }
}
