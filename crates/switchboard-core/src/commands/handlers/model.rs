//! The `model` command

use serde_json::json;

use crate::commands::command::{Command, CommandResult};
use crate::commands::handlers::HandlerContext;
use crate::commands::registry::CommandHandler;
use crate::domain::session::Session;

/// Sets or unsets the active model, optionally with a `backend:` prefix.
pub struct ModelHandler;

impl CommandHandler for ModelHandler {
    fn command_name(&self) -> &'static str {
        "model"
    }

    fn description(&self) -> &'static str {
        "Set or unset the active model (optionally with backend)."
    }

    fn format(&self) -> &'static str {
        "model(name=<backend:>model)"
    }

    fn examples(&self) -> &'static [&'static str] {
        &["!/model(name=gpt-4)", "!/model(name=gemini:gemini-2.5-pro)"]
    }

    fn handle(
        &self,
        command: &Command,
        session: &Session,
        ctx: &HandlerContext<'_>,
    ) -> CommandResult {
        let name = command
            .arg_or_positional("name")
            .map(str::trim)
            .filter(|name| !name.is_empty());

        let Some(name) = name else {
            // Empty or absent name unsets the model override.
            let new_state = session.state.with_model(None);
            return CommandResult::ok_with_state("Model unset", new_state).named("model");
        };

        if ctx.overrides.static_route.is_some() {
            return CommandResult::fail(
                "Cannot change model: locked by CLI override (STATIC_ROUTE)",
            )
            .named("model");
        }

        let (backend, model) = match name.split_once(':') {
            Some((backend, model)) if !backend.is_empty() && !model.is_empty() => {
                (Some(backend.to_string()), model.to_string())
            }
            _ => (None, name.to_string()),
        };

        let mut new_state = session.state.with_model(Some(model.clone()));
        let mut message_parts = Vec::new();
        if let Some(backend) = &backend {
            new_state = new_state.with_backend(Some(backend.clone()));
            message_parts.push(format!("Backend changed to {backend}"));
        }
        message_parts.push(format!("Model changed to {model}"));

        CommandResult::ok_with_state(message_parts.join("; "), new_state)
            .named("model")
            .with_data(json!({ "model": model, "backend": backend }))
    }
}
