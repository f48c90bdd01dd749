//! Command service
//!
//! Walks the inbound messages for inline commands, executes exactly one
//! handler (the latest command in the latest user message), strips every
//! command literal from the forwarded text, and installs any new session
//! state through the store.

use std::sync::Arc;

use tracing::warn;

use crate::commands::command::CommandResult;
use crate::commands::handlers::HandlerContext;
use crate::commands::parser::CommandParser;
use crate::commands::registry::{CommandRegistry, LegacyCommandRegistry};
use crate::config::{CliOverrides, ModelReasoningAliases};
use crate::domain::chat::{ChatMessage, Role};
use crate::error::Result;
use crate::session::store::SessionStore;

/// Outcome of scanning one request for commands.
#[derive(Debug, Default)]
pub struct ProcessedResult {
    pub modified_messages: Vec<ChatMessage>,
    pub command_executed: bool,
    pub command_results: Vec<CommandResult>,
}

pub struct CommandService {
    store: Arc<dyn SessionStore>,
    parser: CommandParser,
    registry: Arc<CommandRegistry>,
    legacy: Arc<LegacyCommandRegistry>,
    overrides: CliOverrides,
    reasoning_aliases: Vec<ModelReasoningAliases>,
    functional_backends: Vec<(String, usize)>,
}

impl CommandService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        registry: Arc<CommandRegistry>,
        command_prefix: &str,
        overrides: CliOverrides,
    ) -> Self {
        Self {
            store,
            parser: CommandParser::new(command_prefix),
            registry,
            legacy: Arc::new(LegacyCommandRegistry::new()),
            overrides,
            reasoning_aliases: Vec::new(),
            functional_backends: Vec::new(),
        }
    }

    pub fn with_reasoning_aliases(mut self, aliases: Vec<ModelReasoningAliases>) -> Self {
        self.reasoning_aliases = aliases;
        self
    }

    pub fn with_functional_backends(mut self, backends: Vec<(String, usize)>) -> Self {
        self.functional_backends = backends;
        self
    }

    pub fn legacy_registry(&self) -> Arc<LegacyCommandRegistry> {
        self.legacy.clone()
    }

    pub fn parser(&self) -> &CommandParser {
        &self.parser
    }

    fn handler_context(&self) -> HandlerContext<'_> {
        HandlerContext {
            overrides: &self.overrides,
            introspection: self.registry.as_ref(),
            reasoning_aliases: &self.reasoning_aliases,
            functional_backends: &self.functional_backends,
            command_prefix: self.parser.prefix(),
        }
    }

    /// Process a message list for the session, executing at most one command.
    pub async fn process_commands(
        &self,
        messages: Vec<ChatMessage>,
        session_id: &str,
    ) -> Result<ProcessedResult> {
        if messages.is_empty() {
            return Ok(ProcessedResult::default());
        }

        let session = self.store.get_or_create(session_id).await;
        let mut modified_messages = messages;
        let mut command_results: Vec<CommandResult> = Vec::new();
        let mut command_executed = false;
        let mut executed_at: Option<usize> = None;

        for idx in (0..modified_messages.len()).rev() {
            if modified_messages[idx].role != Role::User {
                continue;
            }
            let content_str = match modified_messages[idx]
                .content
                .as_ref()
                .and_then(|content| content.first_text())
            {
                Some(text) => text.to_string(),
                None => continue,
            };

            let Some((command, matched_text)) = self.parser.parse(&content_str) else {
                continue;
            };

            self.strip_from_message(&mut modified_messages[idx], &content_str, &matched_text, &command.name);

            if let Some(handler) = self.registry.get(&command.name) {
                let mut result = handler.handle(&command, &session, &self.handler_context());
                if result.name.is_none() {
                    result.name = Some(command.name.clone());
                }
                self.install_state(session_id, &result).await?;
                command_executed = true;
                executed_at = Some(idx);
                command_results.push(result);
                break;
            }

            if let Some(handler) = self.legacy.get(&command.name) {
                let mut result = handler.handle(&command, &session, &self.handler_context());
                if result.name.is_none() {
                    result.name = Some(command.name.clone());
                }
                self.install_state(session_id, &result).await?;
                command_results.push(result);
                // Legacy hits are treated as command-only requests.
                modified_messages.clear();
                command_executed = true;
                break;
            }

            warn!(command = %command.name, "Command not found");
            if modified_messages.len() > 1 {
                command_results.push(
                    CommandResult::fail(format!("Unknown command: {}", command.name))
                        .named(command.name.clone()),
                );
                command_executed = true;
                break;
            }
        }

        // Strip commands from earlier user messages without executing them.
        if let Some(executed_at) = executed_at.filter(|_| command_executed) {
            for message in modified_messages.iter_mut().take(executed_at) {
                if message.role != Role::User {
                    continue;
                }
                let Some(text) = message.content.as_ref().and_then(|c| c.first_text()) else {
                    continue;
                };
                let text = text.to_string();
                let spans = self.parser.all_spans(&text);
                if spans.is_empty() {
                    continue;
                }
                let mut stripped = text.clone();
                for span in spans {
                    stripped = stripped.replace(span, "");
                }
                message.set_first_text(stripped.trim().to_string());
            }
        }

        Ok(ProcessedResult {
            modified_messages,
            command_executed,
            command_results,
        })
    }

    /// Remove the matched command from the message text.
    ///
    /// For `hello` the span is cut out preserving the surrounding text
    /// untrimmed; every other command removes all command literals and
    /// trims the remainder.
    fn strip_from_message(
        &self,
        message: &mut ChatMessage,
        content_str: &str,
        matched_text: &str,
        command_name: &str,
    ) {
        let stripped = if command_name == "hello" {
            match content_str.find(matched_text) {
                Some(idx) => {
                    let mut text = String::with_capacity(content_str.len());
                    text.push_str(&content_str[..idx]);
                    text.push_str(&content_str[idx + matched_text.len()..]);
                    text
                }
                None => content_str.to_string(),
            }
        } else {
            let mut text = content_str.to_string();
            for span in self.parser.all_spans(content_str) {
                text = text.replace(span, "");
            }
            text.trim().to_string()
        };
        message.set_first_text(stripped);
    }

    async fn install_state(&self, session_id: &str, result: &CommandResult) -> Result<()> {
        if let Some(new_state) = result.new_state.clone() {
            self.store
                .update(
                    session_id,
                    Box::new(move |session| {
                        session.state = new_state;
                    }),
                )
                .await?;
        }
        Ok(())
    }
}
