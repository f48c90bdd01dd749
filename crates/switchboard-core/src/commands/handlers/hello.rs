//! The `hello` command

use crate::commands::command::{Command, CommandResult};
use crate::commands::handlers::HandlerContext;
use crate::commands::registry::CommandHandler;
use crate::domain::session::Session;

/// Greets the caller with the welcome banner and marks the session.
pub struct HelloHandler;

impl CommandHandler for HelloHandler {
    fn command_name(&self) -> &'static str {
        "hello"
    }

    fn description(&self) -> &'static str {
        "Greets the user and lists functional backends."
    }

    fn format(&self) -> &'static str {
        "hello"
    }

    fn examples(&self) -> &'static [&'static str] {
        &["!/hello"]
    }

    fn handle(
        &self,
        _command: &Command,
        session: &Session,
        ctx: &HandlerContext<'_>,
    ) -> CommandResult {
        let prefix = ctx.command_prefix;
        let mut message = String::from("Welcome to Switchboard!\n");

        if !ctx.functional_backends.is_empty() {
            message.push_str("\nFunctional backends:\n");
            for (name, model_count) in ctx.functional_backends {
                message.push_str(&format!("- {name} ({model_count} models)\n"));
            }
        }

        message.push_str(&format!(
            "\nAvailable commands:\n\
             - {prefix}help - Show help information\n\
             - {prefix}set(param=value) - Set a parameter value\n\
             - {prefix}unset(param) - Unset a parameter value"
        ));

        let new_state = session.state.with_hello_requested(true);
        CommandResult::ok_with_state(message, new_state).named("hello")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::handlers::test_support::ContextFixture;

    #[test]
    fn test_hello_sets_flag_and_lists_backends() {
        let mut fixture = ContextFixture::default();
        fixture.functional_backends = vec![("openai".to_string(), 12), ("gemini".to_string(), 4)];
        let session = Session::new("s1");

        let result = HelloHandler.handle(&Command::new("hello"), &session, &fixture.context());
        assert!(result.success);
        assert!(result.message.contains("Welcome to Switchboard!"));
        assert!(result.message.contains("- openai (12 models)"));
        assert!(result.message.contains("- gemini (4 models)"));
        assert!(result.message.contains("!/help"));
        assert!(result.new_state.unwrap().hello_requested);
    }

    #[test]
    fn test_hello_without_backends_omits_section() {
        let fixture = ContextFixture::default();
        let session = Session::new("s1");
        let result = HelloHandler.handle(&Command::new("hello"), &session, &fixture.context());
        assert!(!result.message.contains("Functional backends"));
        assert!(result.message.contains("Available commands:"));
    }
}
