//! Core data structures for the command system

use std::collections::BTreeMap;

use serde_json::Value;

use crate::domain::session::SessionState;

/// A parsed command with its name and arguments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Command {
    pub name: String,
    /// `key=value` arguments, in insertion-independent order.
    pub args: BTreeMap<String, String>,
    /// Bare (non `key=value`) arguments, in order of appearance.
    pub positional: Vec<String>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn with_positional(mut self, value: impl Into<String>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    /// Named argument, falling back to the first positional argument.
    pub fn arg_or_positional(&self, key: &str) -> Option<&str> {
        self.arg(key)
            .or_else(|| self.positional.first().map(String::as_str))
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.positional.is_empty()
    }
}

/// Result of executing a command handler.
///
/// `new_state` is present iff the command mutated session state; the caller
/// must install it back into the session.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    pub name: Option<String>,
    pub data: Option<Value>,
    pub new_state: Option<SessionState>,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            name: None,
            data: None,
            new_state: None,
        }
    }

    pub fn ok_with_state(message: impl Into<String>, new_state: SessionState) -> Self {
        Self {
            success: true,
            message: message.into(),
            name: None,
            data: None,
            new_state: Some(new_state),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            name: None,
            data: None,
            new_state: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Parse a boolean-ish command argument value.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "enabled" => Some(true),
        "false" | "0" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Extract the boolean flag of an `enabled=…` style command.
///
/// A command with no arguments means `true`; an unparseable value reports
/// the offending text back for the error message.
pub fn bool_flag(command: &Command) -> Result<bool, Option<String>> {
    if command.is_empty() {
        return Ok(true);
    }
    let raw = command
        .arg("enabled")
        .or_else(|| command.args.values().next().map(String::as_str))
        .or_else(|| command.positional.first().map(String::as_str));
    match raw {
        None => Ok(true),
        Some(value) => parse_bool(value).ok_or_else(|| Some(value.to_string())),
    }
}
