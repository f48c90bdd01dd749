//! The `unset` command

use crate::commands::command::{Command, CommandResult};
use crate::commands::handlers::HandlerContext;
use crate::commands::registry::CommandHandler;
use crate::domain::session::{Session, SessionState};

/// Clears named session state fields.
pub struct UnsetHandler;

impl CommandHandler for UnsetHandler {
    fn command_name(&self) -> &'static str {
        "unset"
    }

    fn description(&self) -> &'static str {
        "Unset a session value."
    }

    fn format(&self) -> &'static str {
        "unset(key)"
    }

    fn examples(&self) -> &'static [&'static str] {
        &["!/unset(model)", "!/unset(project)"]
    }

    fn handle(
        &self,
        command: &Command,
        session: &Session,
        _ctx: &HandlerContext<'_>,
    ) -> CommandResult {
        let keys: Vec<&str> = command
            .positional
            .iter()
            .map(String::as_str)
            .chain(command.args.keys().map(String::as_str))
            .collect();
        if keys.is_empty() {
            return CommandResult::fail("No arguments provided.").named("unset");
        }

        let mut state = session.state.clone();
        let mut cleared = Vec::new();
        for key in keys {
            match clear_parameter(&state, key) {
                Some(next) => {
                    state = next;
                    cleared.push(format!("{key} unset"));
                }
                None => {
                    return CommandResult::fail(format!("Unknown parameter: {key}")).named("unset")
                }
            }
        }

        CommandResult::ok_with_state(cleared.join("; "), state).named("unset")
    }
}

fn clear_parameter(state: &SessionState, key: &str) -> Option<SessionState> {
    match key {
        "model" => Some(state.with_model(None)),
        "backend" => Some(state.with_backend(None)),
        "project" | "project-name" => Some(state.with_project(None)),
        "project-dir" | "dir" | "project-directory" => Some(state.with_project_dir(None)),
        "temperature" => Some(state.with_temperature(None)),
        "top_p" | "top-p" => Some(state.with_top_p(None)),
        "reasoning-effort" | "reasoning_effort" | "reasoning" => {
            Some(state.with_reasoning_effort(None))
        }
        "thinking-budget" | "thinking_budget" | "budget" => Some(state.with_thinking_budget(None)),
        "provider" => Some(state.with_provider(None)),
        "redact-api-keys-in-prompts" => Some(state.with_redaction_enabled(None)),
        "pytest-compression-min-lines" => Some(state.with_pytest_compression_min_lines(None)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::handlers::test_support::ContextFixture;

    #[test]
    fn test_unset_model() {
        let fixture = ContextFixture::default();
        let mut session = Session::new("s1");
        session.state = session.state.with_model(Some("gpt-4".to_string()));

        let command = Command::new("unset").with_positional("model");
        let result = UnsetHandler.handle(&command, &session, &fixture.context());
        assert!(result.success);
        assert_eq!(result.message, "model unset");
        assert!(result.new_state.unwrap().backend_config.model.is_none());
    }

    #[test]
    fn test_unset_unknown_parameter() {
        let fixture = ContextFixture::default();
        let session = Session::new("s1");
        let command = Command::new("unset").with_positional("nonsense");
        let result = UnsetHandler.handle(&command, &session, &fixture.context());
        assert!(!result.success);
        assert_eq!(result.message, "Unknown parameter: nonsense");
    }

    #[test]
    fn test_unset_without_arguments() {
        let fixture = ContextFixture::default();
        let session = Session::new("s1");
        let result = UnsetHandler.handle(&Command::new("unset"), &session, &fixture.context());
        assert!(!result.success);
        assert_eq!(result.message, "No arguments provided.");
    }
}
