//! Reasoning alias commands (`max`, `medium`, `low`, `no-think`, `mode`)
//! and the session `provider` override
//!
//! Alias commands look the session's current model up in the config-loaded
//! alias table (wildcard model patterns) and install the matched mode's
//! reasoning settings.

use crate::commands::command::{Command, CommandResult};
use crate::commands::handlers::HandlerContext;
use crate::commands::registry::CommandHandler;
use crate::config::{ModelReasoningAliases, ReasoningMode};
use crate::domain::session::Session;
use crate::util::wildcard_match;

/// Selects a preconfigured reasoning mode for the current model.
pub struct ReasoningAliasHandler {
    name: &'static str,
    level: &'static str,
    description: &'static str,
    format: &'static str,
    examples: &'static [&'static str],
}

impl ReasoningAliasHandler {
    pub fn max() -> Self {
        Self {
            name: "max",
            level: "high",
            description: "Activates the max reasoning mode.",
            format: "max",
            examples: &["!/max"],
        }
    }

    pub fn medium() -> Self {
        Self {
            name: "medium",
            level: "medium",
            description: "Activates the medium reasoning mode.",
            format: "medium",
            examples: &["!/medium"],
        }
    }

    pub fn low() -> Self {
        Self {
            name: "low",
            level: "low",
            description: "Activates the low reasoning mode.",
            format: "low",
            examples: &["!/low"],
        }
    }

    pub fn no_think() -> Self {
        Self {
            name: "no-think",
            level: "none",
            description: "Disables model reasoning.",
            format: "no-think",
            examples: &["!/no-think"],
        }
    }
}

fn find_mode<'a>(
    aliases: &'a [ModelReasoningAliases],
    model: &str,
    level: &str,
) -> Option<&'a ReasoningMode> {
    aliases
        .iter()
        .find(|entry| wildcard_match(&entry.model, model))
        .and_then(|entry| entry.modes.get(level))
}

impl CommandHandler for ReasoningAliasHandler {
    fn command_name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        self.description
    }

    fn format(&self) -> &'static str {
        self.format
    }

    fn examples(&self) -> &'static [&'static str] {
        self.examples
    }

    fn handle(
        &self,
        _command: &Command,
        session: &Session,
        ctx: &HandlerContext<'_>,
    ) -> CommandResult {
        if ctx.reasoning_aliases.is_empty() {
            return CommandResult::fail("Reasoning aliases are not configured.").named(self.name);
        }

        let Some(model) = session.model() else {
            return CommandResult::fail("No reasoning settings found for model (not set).")
                .named(self.name);
        };

        match find_mode(ctx.reasoning_aliases, model, self.level) {
            Some(mode) => {
                let new_state = session.state.with_reasoning_mode(mode);
                CommandResult::ok_with_state(
                    format!("Reasoning mode set to {}.", self.name),
                    new_state,
                )
                .named(self.name)
            }
            None => CommandResult::fail(format!(
                "No reasoning settings found for model {model}."
            ))
            .named(self.name),
        }
    }
}

/// Sets the provider override for the current session.
pub struct ProviderHandler;

impl CommandHandler for ProviderHandler {
    fn command_name(&self) -> &'static str {
        "provider"
    }

    fn description(&self) -> &'static str {
        "Sets the provider for the current session."
    }

    fn format(&self) -> &'static str {
        "provider(provider_name)"
    }

    fn examples(&self) -> &'static [&'static str] {
        &["!/provider(anthropic)", "!/provider(openai)"]
    }

    fn handle(
        &self,
        command: &Command,
        session: &Session,
        _ctx: &HandlerContext<'_>,
    ) -> CommandResult {
        let provider = command
            .arg_or_positional("provider_name")
            .map(str::trim)
            .filter(|name| !name.is_empty());
        let Some(provider) = provider else {
            return CommandResult::fail("Provider name is required.").named("provider");
        };

        let new_state = session.state.with_provider(Some(provider.to_string()));
        CommandResult::ok_with_state(format!("Provider set to {provider}."), new_state)
            .named("provider")
    }
}

/// Selects a named reasoning mode for the current model.
pub struct ModeHandler;

impl CommandHandler for ModeHandler {
    fn command_name(&self) -> &'static str {
        "mode"
    }

    fn description(&self) -> &'static str {
        "Sets the reasoning mode for the current session."
    }

    fn format(&self) -> &'static str {
        "mode(mode_name)"
    }

    fn examples(&self) -> &'static [&'static str] {
        &["!/mode(max)", "!/mode(low)"]
    }

    fn handle(
        &self,
        command: &Command,
        session: &Session,
        ctx: &HandlerContext<'_>,
    ) -> CommandResult {
        let mode_name = command
            .arg_or_positional("mode_name")
            .map(str::trim)
            .filter(|name| !name.is_empty());
        let Some(mode_name) = mode_name else {
            return CommandResult::fail("Mode name is required.").named("mode");
        };

        if ctx.reasoning_aliases.is_empty() {
            return CommandResult::fail("Reasoning aliases are not configured.").named("mode");
        }

        let Some(model) = session.model() else {
            return CommandResult::fail("No reasoning settings found for model (not set).")
                .named("mode");
        };

        match find_mode(ctx.reasoning_aliases, model, mode_name) {
            Some(mode) => {
                let new_state = session.state.with_reasoning_mode(mode);
                CommandResult::ok_with_state(
                    format!("Reasoning mode set to {mode_name}."),
                    new_state,
                )
                .named("mode")
            }
            None => CommandResult::fail(format!(
                "No reasoning settings found for model {model}."
            ))
            .named("mode"),
        }
    }
}
