//! The `help` command

use crate::commands::command::{Command, CommandResult};
use crate::commands::handlers::HandlerContext;
use crate::commands::registry::CommandHandler;
use crate::domain::session::Session;

/// Lists every registered command or describes one of them.
pub struct HelpHandler;

impl CommandHandler for HelpHandler {
    fn command_name(&self) -> &'static str {
        "help"
    }

    fn description(&self) -> &'static str {
        "Shows a list of all available commands or help for a specific command."
    }

    fn format(&self) -> &'static str {
        "help [command_name]"
    }

    fn examples(&self) -> &'static [&'static str] {
        &["!/help", "!/help(hello)"]
    }

    fn handle(
        &self,
        command: &Command,
        _session: &Session,
        ctx: &HandlerContext<'_>,
    ) -> CommandResult {
        let requested = command
            .arg("command_name")
            .or_else(|| command.arg("command"))
            .or_else(|| command.positional.first().map(String::as_str))
            .or_else(|| command.args.values().next().map(String::as_str))
            .map(str::trim)
            .filter(|name| !name.is_empty());

        if let Some(name) = requested {
            return match ctx.introspection.describe(name) {
                Some(help) => {
                    let mut parts = vec![
                        format!("{} - {}", help.name, help.description),
                        format!("Format: {}", help.format),
                        "Examples:".to_string(),
                    ];
                    parts.extend(help.examples.iter().map(|ex| format!("  {ex}")));
                    CommandResult::ok(parts.join("\n")).named("help")
                }
                None => CommandResult::fail(format!("Command '{name}' not found.")).named("help"),
            };
        }

        let all = ctx.introspection.list_commands();
        if all.is_empty() {
            return CommandResult::ok("No commands available.").named("help");
        }
        let mut lines = vec!["Available commands:".to_string()];
        for help in all {
            lines.push(format!("- {} - {}", help.name, help.description));
        }
        CommandResult::ok(lines.join("\n")).named("help")
    }
}
