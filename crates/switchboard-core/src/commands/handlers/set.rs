//! The `set` command

use std::path::PathBuf;

use crate::commands::command::{parse_bool, Command, CommandResult};
use crate::commands::handlers::HandlerContext;
use crate::commands::registry::CommandHandler;
use crate::domain::session::{ReasoningEffort, Session, SessionState, ToolLoopMode};
use crate::util::expand_path;

/// Mutates permitted session state fields through `key=value` pairs.
pub struct SetHandler;

impl CommandHandler for SetHandler {
    fn command_name(&self) -> &'static str {
        "set"
    }

    fn description(&self) -> &'static str {
        "Set a session value."
    }

    fn format(&self) -> &'static str {
        "set(key=value, ...)"
    }

    fn examples(&self) -> &'static [&'static str] {
        &[
            "!/set(model=openai:gpt-4)",
            "!/set(project=alpha, temperature=0.3)",
            "!/set(project-dir=~/work/alpha)",
        ]
    }

    fn handle(
        &self,
        command: &Command,
        session: &Session,
        ctx: &HandlerContext<'_>,
    ) -> CommandResult {
        if command.args.is_empty() {
            return CommandResult::fail("No arguments provided.").named("set");
        }

        let mut state = session.state.clone();
        let mut messages = Vec::new();
        for (key, value) in &command.args {
            match apply_parameter(&state, key, value, ctx) {
                Ok((next, message)) => {
                    state = next;
                    messages.push(message);
                }
                Err(message) => return CommandResult::fail(message).named("set"),
            }
        }

        CommandResult::ok_with_state(messages.join("; "), state).named("set")
    }
}

fn apply_parameter(
    state: &SessionState,
    key: &str,
    value: &str,
    ctx: &HandlerContext<'_>,
) -> Result<(SessionState, String), String> {
    match key {
        "model" => {
            ensure_route_unlocked(ctx, "model")?;
            let (backend, model) = match value.split_once(':') {
                Some((backend, model)) if !backend.is_empty() => {
                    (Some(backend.to_string()), model.to_string())
                }
                _ => (None, value.to_string()),
            };
            let mut next = state.with_model(Some(model.clone()));
            if let Some(backend) = backend {
                next = next.with_backend(Some(backend));
            }
            Ok((next, format!("Model set to {model}")))
        }
        "backend" => {
            ensure_route_unlocked(ctx, "backend")?;
            Ok((
                state.with_backend(Some(value.to_string())),
                format!("Backend set to {value}"),
            ))
        }
        "project" | "project-name" => Ok((
            state.with_project(Some(value.to_string())),
            format!("Project set to {value}"),
        )),
        "project-dir" | "dir" | "project-directory" => {
            let expanded = expand_path(value);
            let path = PathBuf::from(&expanded);
            if !path.is_dir() {
                return Err(format!("Directory not found: {expanded}"));
            }
            let absolute = path.canonicalize().unwrap_or(path);
            let message = format!("Project directory set to {}", absolute.display());
            Ok((state.with_project_dir(Some(absolute)), message))
        }
        "temperature" => {
            let parsed: f64 = value
                .parse()
                .map_err(|_| format!("Invalid temperature: {value}"))?;
            if !(0.0..=1.0).contains(&parsed) {
                return Err("temperature must be between 0.0 and 1.0".to_string());
            }
            Ok((
                state.with_temperature(Some(parsed)),
                format!("Temperature set to {parsed}"),
            ))
        }
        "top_p" | "top-p" => {
            let parsed: f64 = value.parse().map_err(|_| format!("Invalid top_p: {value}"))?;
            if !(0.0..=1.0).contains(&parsed) {
                return Err("top_p must be between 0.0 and 1.0".to_string());
            }
            Ok((state.with_top_p(Some(parsed)), format!("top_p set to {parsed}")))
        }
        "reasoning-effort" | "reasoning_effort" | "reasoning" => {
            ensure_budget_unlocked(ctx, "reasoning-effort")?;
            let effort = ReasoningEffort::parse(value).ok_or_else(|| {
                format!("Invalid reasoning effort '{value}'. Valid values: low, medium, high, none")
            })?;
            Ok((
                state.with_reasoning_effort(Some(effort)),
                format!("Reasoning effort set to {}", effort.as_str()),
            ))
        }
        "thinking-budget" | "thinking_budget" | "budget" => {
            ensure_budget_unlocked(ctx, "thinking-budget")?;
            let budget: u32 = value
                .parse()
                .map_err(|_| format!("Invalid thinking budget: {value}"))?;
            Ok((
                state.with_thinking_budget(Some(budget)),
                format!("Thinking budget set to {budget}"),
            ))
        }
        "redact-api-keys-in-prompts" => {
            let enabled = parse_bool(value)
                .ok_or_else(|| format!("Invalid boolean value: {value}"))?;
            Ok((
                state.with_redaction_enabled(Some(enabled)),
                format!(
                    "API key redaction {}",
                    if enabled { "enabled" } else { "disabled" }
                ),
            ))
        }
        "loop-detection" => {
            let enabled = parse_bool(value)
                .ok_or_else(|| format!("Invalid boolean value: {value}"))?;
            let mut loop_config = state.loop_config.clone();
            loop_config.loop_detection_enabled = enabled;
            Ok((
                state.with_loop_config(loop_config),
                format!(
                    "Loop detection {}",
                    if enabled { "enabled" } else { "disabled" }
                ),
            ))
        }
        "tool-loop-detection" => {
            let enabled = parse_bool(value)
                .ok_or_else(|| format!("Invalid boolean value: {value}"))?;
            let mut loop_config = state.loop_config.clone();
            loop_config.tool_loop_detection_enabled = enabled;
            Ok((
                state.with_loop_config(loop_config),
                format!(
                    "Tool loop detection {}",
                    if enabled { "enabled" } else { "disabled" }
                ),
            ))
        }
        "tool-loop-mode" => {
            let mode = ToolLoopMode::parse(value).ok_or_else(|| {
                format!(
                    "Invalid mode '{value}'. Valid modes: {}",
                    ToolLoopMode::VALID_MODES
                )
            })?;
            let mut loop_config = state.loop_config.clone();
            loop_config.tool_loop_mode = mode;
            Ok((
                state.with_loop_config(loop_config),
                format!("Tool loop mode set to {}", mode.as_str()),
            ))
        }
        "tool-loop-max-repeats" => {
            let repeats: u32 = value
                .parse()
                .map_err(|_| format!("Invalid value: {value}"))?;
            if repeats < 1 {
                return Err("tool-loop-max-repeats must be at least 1".to_string());
            }
            let mut loop_config = state.loop_config.clone();
            loop_config.tool_loop_max_repeats = repeats;
            Ok((
                state.with_loop_config(loop_config),
                format!("Tool loop max repeats set to {repeats}"),
            ))
        }
        "tool-loop-ttl" => {
            let ttl: u64 = value.parse().map_err(|_| format!("Invalid value: {value}"))?;
            if ttl < 1 {
                return Err("tool-loop-ttl must be at least 1".to_string());
            }
            let mut loop_config = state.loop_config.clone();
            loop_config.tool_loop_ttl_seconds = ttl;
            Ok((
                state.with_loop_config(loop_config),
                format!("Tool loop TTL set to {ttl} seconds"),
            ))
        }
        "pytest-compression" => {
            let enabled = parse_bool(value)
                .ok_or_else(|| format!("Invalid boolean value: {value}"))?;
            Ok((
                state.with_pytest_compression(enabled),
                format!(
                    "Pytest compression {}",
                    if enabled { "enabled" } else { "disabled" }
                ),
            ))
        }
        "pytest-compression-min-lines" => {
            let min_lines: usize = value
                .parse()
                .map_err(|_| format!("Invalid value: {value}"))?;
            Ok((
                state.with_pytest_compression_min_lines(Some(min_lines)),
                format!("Pytest compression minimum lines set to {min_lines}"),
            ))
        }
        "compress-next-tool-call-reply" => {
            let enabled = parse_bool(value)
                .ok_or_else(|| format!("Invalid boolean value: {value}"))?;
            Ok((
                state.with_compress_next_tool_call_reply(enabled),
                format!(
                    "Next tool call reply compression {}",
                    if enabled { "enabled" } else { "disabled" }
                ),
            ))
        }
        _ => Err(format!("Unknown parameter: {key}")),
    }
}

fn ensure_route_unlocked(ctx: &HandlerContext<'_>, key: &str) -> Result<(), String> {
    if ctx.overrides.static_route.is_some() {
        return Err(format!(
            "Cannot change {key}: locked by CLI override (STATIC_ROUTE)"
        ));
    }
    Ok(())
}

fn ensure_budget_unlocked(ctx: &HandlerContext<'_>, key: &str) -> Result<(), String> {
    if ctx.overrides.thinking_budget.is_some() {
        return Err(format!(
            "Cannot change {key}: locked by CLI override (THINKING_BUDGET)"
        ));
    }
    Ok(())
}
