//! Command handler registry
//!
//! A string-keyed map from command name to handler. A handler may be
//! registered under several names (the failover family shares one handler;
//! `no-think` has spelling aliases). A secondary "legacy" registry can hold
//! externally registered handlers consulted when the primary lookup misses.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::commands::command::{Command, CommandResult};
use crate::commands::handlers::HandlerContext;
use crate::domain::session::Session;

/// Contract implemented by every command handler.
pub trait CommandHandler: Send + Sync {
    fn command_name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn format(&self) -> &'static str;
    fn examples(&self) -> &'static [&'static str];
    fn handle(&self, command: &Command, session: &Session, ctx: &HandlerContext<'_>)
        -> CommandResult;
}

/// Help metadata for one registered command name.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandHelp {
    pub name: String,
    pub description: String,
    pub format: String,
    pub examples: Vec<String>,
}

/// Narrow introspection surface handed to handlers that need to enumerate
/// or describe commands (currently `help` and `hello`).
pub trait CommandIntrospection: Send + Sync {
    fn list_commands(&self) -> Vec<CommandHelp>;
    fn describe(&self, name: &str) -> Option<CommandHelp>;
}

#[derive(Default)]
pub struct CommandRegistry {
    handlers: BTreeMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every built-in handler installed.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        crate::commands::handlers::register_all(&mut registry);
        registry
    }

    /// Register a handler under its own command name.
    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) {
        self.register_as(handler.command_name(), handler.clone());
    }

    /// Register a handler under an explicit name (aliases, families).
    pub fn register_as(&mut self, name: &str, handler: Arc<dyn CommandHandler>) {
        let name = name.to_lowercase();
        if self.handlers.contains_key(&name) {
            panic!("command '{name}' is already registered");
        }
        self.handlers.insert(name, handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(&name.to_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl CommandIntrospection for CommandRegistry {
    fn list_commands(&self) -> Vec<CommandHelp> {
        self.handlers
            .iter()
            .map(|(name, handler)| CommandHelp {
                name: name.clone(),
                description: handler.description().to_string(),
                format: handler.format().to_string(),
                examples: handler.examples().iter().map(|e| e.to_string()).collect(),
            })
            .collect()
    }

    fn describe(&self, name: &str) -> Option<CommandHelp> {
        let name = name.to_lowercase();
        self.handlers.get(&name).map(|handler| CommandHelp {
            name,
            description: handler.description().to_string(),
            format: handler.format().to_string(),
            examples: handler.examples().iter().map(|e| e.to_string()).collect(),
        })
    }
}

/// Secondary registry consulted when the primary lookup misses.
///
/// Handlers here are registered at runtime (plugins, tests); results are
/// wrapped exactly like primary results.
#[derive(Default)]
pub struct LegacyCommandRegistry {
    handlers: RwLock<BTreeMap<String, Arc<dyn CommandHandler>>>,
}

impl LegacyCommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, handler: Arc<dyn CommandHandler>) {
        self.handlers
            .write()
            .insert(name.to_lowercase(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.read().get(&name.to_lowercase()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_contains_core_commands() {
        let registry = CommandRegistry::standard();
        for name in [
            "hello",
            "help",
            "set",
            "unset",
            "model",
            "create-failover-route",
            "delete-failover-route",
            "list-failover-routes",
            "route-append",
            "route-prepend",
            "route-clear",
            "route-list",
            "loop-detection",
            "tool-loop-detection",
            "tool-loop-mode",
            "tool-loop-max-repeats",
            "tool-loop-ttl",
            "max",
            "medium",
            "low",
            "no-think",
            "no-thinking",
            "no-reasoning",
            "disable-thinking",
            "disable-reasoning",
            "provider",
            "mode",
            "workspace",
        ] {
            assert!(registry.get(name).is_some(), "missing command {name}");
        }
    }

    #[test]
    fn test_describe_unknown() {
        let registry = CommandRegistry::standard();
        assert!(registry.describe("bogus").is_none());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = CommandRegistry::standard();
        assert!(registry.get("HELLO").is_some());
    }
}
