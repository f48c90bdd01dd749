//! Loop-detection toggle commands

use crate::commands::command::{bool_flag, Command, CommandResult};
use crate::commands::handlers::HandlerContext;
use crate::commands::registry::CommandHandler;
use crate::domain::session::{Session, ToolLoopMode};

fn bool_flag_or_fail(command: &Command) -> Result<bool, CommandResult> {
    bool_flag(command).map_err(|invalid| {
        CommandResult::fail(match invalid {
            Some(_) => "Error: Invalid value. Please use 'true' or 'false'.".to_string(),
            None => "Error: Please provide a value (true/false).".to_string(),
        })
    })
}

fn first_value<'c>(command: &'c Command) -> Option<&'c str> {
    command
        .positional
        .first()
        .map(String::as_str)
        .or_else(|| command.args.values().next().map(String::as_str))
}

pub struct LoopDetectionHandler;

impl CommandHandler for LoopDetectionHandler {
    fn command_name(&self) -> &'static str {
        "loop-detection"
    }

    fn description(&self) -> &'static str {
        "Enable or disable loop detection."
    }

    fn format(&self) -> &'static str {
        "loop-detection(enabled=true|false)"
    }

    fn examples(&self) -> &'static [&'static str] {
        &["!/loop-detection(enabled=true)", "!/loop-detection(enabled=false)"]
    }

    fn handle(
        &self,
        command: &Command,
        session: &Session,
        _ctx: &HandlerContext<'_>,
    ) -> CommandResult {
        let enabled = match bool_flag_or_fail(command) {
            Ok(enabled) => enabled,
            Err(result) => return result.named("loop-detection"),
        };
        let mut loop_config = session.state.loop_config.clone();
        loop_config.loop_detection_enabled = enabled;
        let new_state = session.state.with_loop_config(loop_config);
        CommandResult::ok_with_state(
            if enabled {
                "Loop detection enabled"
            } else {
                "Loop detection disabled"
            },
            new_state,
        )
        .named("loop-detection")
    }
}

pub struct ToolLoopDetectionHandler;

impl CommandHandler for ToolLoopDetectionHandler {
    fn command_name(&self) -> &'static str {
        "tool-loop-detection"
    }

    fn description(&self) -> &'static str {
        "Enable or disable tool loop detection."
    }

    fn format(&self) -> &'static str {
        "tool-loop-detection(enabled=true|false)"
    }

    fn examples(&self) -> &'static [&'static str] {
        &[
            "!/tool-loop-detection(enabled=true)",
            "!/tool-loop-detection(enabled=false)",
        ]
    }

    fn handle(
        &self,
        command: &Command,
        session: &Session,
        _ctx: &HandlerContext<'_>,
    ) -> CommandResult {
        let enabled = match bool_flag_or_fail(command) {
            Ok(enabled) => enabled,
            Err(result) => return result.named("tool-loop-detection"),
        };
        let mut loop_config = session.state.loop_config.clone();
        loop_config.tool_loop_detection_enabled = enabled;
        let new_state = session.state.with_loop_config(loop_config);
        CommandResult::ok_with_state(
            if enabled {
                "Tool loop detection enabled"
            } else {
                "Tool loop detection disabled"
            },
            new_state,
        )
        .named("tool-loop-detection")
    }
}

pub struct ToolLoopModeHandler;

impl CommandHandler for ToolLoopModeHandler {
    fn command_name(&self) -> &'static str {
        "tool-loop-mode"
    }

    fn description(&self) -> &'static str {
        "Set the mode for tool loop detection."
    }

    fn format(&self) -> &'static str {
        "tool-loop-mode(mode=none|simple)"
    }

    fn examples(&self) -> &'static [&'static str] {
        &["!/tool-loop-mode(none)", "!/tool-loop-mode(simple)"]
    }

    fn handle(
        &self,
        command: &Command,
        session: &Session,
        _ctx: &HandlerContext<'_>,
    ) -> CommandResult {
        let raw = command.arg("mode").or_else(|| first_value(command));
        let Some(raw) = raw else {
            return CommandResult::fail("Error: Please provide a mode.").named("tool-loop-mode");
        };
        let Some(mode) = ToolLoopMode::parse(raw) else {
            return CommandResult::fail(format!(
                "Invalid mode '{raw}'. Valid modes: {}",
                ToolLoopMode::VALID_MODES
            ))
            .named("tool-loop-mode");
        };
        let mut loop_config = session.state.loop_config.clone();
        loop_config.tool_loop_mode = mode;
        let new_state = session.state.with_loop_config(loop_config);
        CommandResult::ok_with_state(
            format!("Tool loop mode set to {}.", mode.as_str()),
            new_state,
        )
        .named("tool-loop-mode")
    }
}

pub struct ToolLoopMaxRepeatsHandler;

impl CommandHandler for ToolLoopMaxRepeatsHandler {
    fn command_name(&self) -> &'static str {
        "tool-loop-max-repeats"
    }

    fn description(&self) -> &'static str {
        "Set the maximum number of repeats for tool loop detection."
    }

    fn format(&self) -> &'static str {
        "tool-loop-max-repeats(value)"
    }

    fn examples(&self) -> &'static [&'static str] {
        &["!/tool-loop-max-repeats(5)"]
    }

    fn handle(
        &self,
        command: &Command,
        session: &Session,
        _ctx: &HandlerContext<'_>,
    ) -> CommandResult {
        let raw = command.arg("value").or_else(|| first_value(command));
        let Some(raw) = raw else {
            return CommandResult::fail("Error: Please provide a value.")
                .named("tool-loop-max-repeats");
        };
        let repeats = match raw.trim().parse::<u32>() {
            Ok(repeats) if repeats >= 1 => repeats,
            _ => {
                return CommandResult::fail(
                    "Error: Value must be an integer greater than or equal to 1.",
                )
                .named("tool-loop-max-repeats")
            }
        };
        let mut loop_config = session.state.loop_config.clone();
        loop_config.tool_loop_max_repeats = repeats;
        let new_state = session.state.with_loop_config(loop_config);
        CommandResult::ok_with_state(
            format!("Tool loop max repeats set to {repeats}."),
            new_state,
        )
        .named("tool-loop-max-repeats")
    }
}

pub struct ToolLoopTtlHandler;

impl CommandHandler for ToolLoopTtlHandler {
    fn command_name(&self) -> &'static str {
        "tool-loop-ttl"
    }

    fn description(&self) -> &'static str {
        "Set the time window in seconds for tool loop detection."
    }

    fn format(&self) -> &'static str {
        "tool-loop-ttl(seconds)"
    }

    fn examples(&self) -> &'static [&'static str] {
        &["!/tool-loop-ttl(120)"]
    }

    fn handle(
        &self,
        command: &Command,
        session: &Session,
        _ctx: &HandlerContext<'_>,
    ) -> CommandResult {
        let raw = command
            .arg("seconds")
            .or_else(|| command.arg("value"))
            .or_else(|| first_value(command));
        let Some(raw) = raw else {
            return CommandResult::fail("Error: Please provide a value.").named("tool-loop-ttl");
        };
        let ttl = match raw.trim().parse::<u64>() {
            Ok(ttl) if ttl >= 1 => ttl,
            _ => {
                return CommandResult::fail(
                    "Error: Value must be an integer greater than or equal to 1.",
                )
                .named("tool-loop-ttl")
            }
        };
        let mut loop_config = session.state.loop_config.clone();
        loop_config.tool_loop_ttl_seconds = ttl;
        let new_state = session.state.with_loop_config(loop_config);
        CommandResult::ok_with_state(format!("Tool loop TTL set to {ttl} seconds."), new_state)
            .named("tool-loop-ttl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::handlers::test_support::ContextFixture;

    #[test]
    fn test_loop_detection_toggle() {
        let fixture = ContextFixture::default();
        let session = Session::new("s1");
        let command = Command::new("loop-detection").with_arg("enabled", "false");
        let result = LoopDetectionHandler.handle(&command, &session, &fixture.context());
        assert!(result.success);
        assert_eq!(result.message, "Loop detection disabled");
        assert!(!result.new_state.unwrap().loop_config.loop_detection_enabled);
    }

    #[test]
    fn test_loop_detection_defaults_to_enabled() {
        let fixture = ContextFixture::default();
        let mut session = Session::new("s1");
        let mut loop_config = session.state.loop_config.clone();
        loop_config.loop_detection_enabled = false;
        session.state = session.state.with_loop_config(loop_config);

        let result =
            LoopDetectionHandler.handle(&Command::new("loop-detection"), &session, &fixture.context());
        assert!(result.success);
        assert!(result.new_state.unwrap().loop_config.loop_detection_enabled);
    }

    #[test]
    fn test_loop_detection_invalid_value() {
        let fixture = ContextFixture::default();
        let session = Session::new("s1");
        let command = Command::new("loop-detection").with_arg("enabled", "perhaps");
        let result = LoopDetectionHandler.handle(&command, &session, &fixture.context());
        assert!(!result.success);
        assert_eq!(
            result.message,
            "Error: Invalid value. Please use 'true' or 'false'."
        );
    }

    #[test]
    fn test_tool_loop_mode() {
        let fixture = ContextFixture::default();
        let session = Session::new("s1");
        let command = Command::new("tool-loop-mode").with_positional("none");
        let result = ToolLoopModeHandler.handle(&command, &session, &fixture.context());
        assert!(result.success);
        assert_eq!(result.message, "Tool loop mode set to none.");
        assert_eq!(
            result.new_state.unwrap().loop_config.tool_loop_mode,
            ToolLoopMode::None
        );
    }

    #[test]
    fn test_tool_loop_mode_invalid() {
        let fixture = ContextFixture::default();
        let session = Session::new("s1");
        let command = Command::new("tool-loop-mode").with_positional("aggressive");
        let result = ToolLoopModeHandler.handle(&command, &session, &fixture.context());
        assert!(!result.success);
        assert!(result.message.contains("Valid modes: none, simple"));
    }

    #[test]
    fn test_max_repeats_lower_bound() {
        let fixture = ContextFixture::default();
        let session = Session::new("s1");
        let command = Command::new("tool-loop-max-repeats").with_positional("0");
        let result = ToolLoopMaxRepeatsHandler.handle(&command, &session, &fixture.context());
        assert!(!result.success);

        let command = Command::new("tool-loop-max-repeats").with_positional("3");
        let result = ToolLoopMaxRepeatsHandler.handle(&command, &session, &fixture.context());
        assert!(result.success);
        assert_eq!(result.new_state.unwrap().loop_config.tool_loop_max_repeats, 3);
    }

    #[test]
    fn test_ttl() {
        let fixture = ContextFixture::default();
        let session = Session::new("s1");
        let command = Command::new("tool-loop-ttl").with_positional("90");
        let result = ToolLoopTtlHandler.handle(&command, &session, &fixture.context());
        assert!(result.success);
        assert_eq!(result.message, "Tool loop TTL set to 90 seconds.");
        assert_eq!(result.new_state.unwrap().loop_config.tool_loop_ttl_seconds, 90);
    }
}
