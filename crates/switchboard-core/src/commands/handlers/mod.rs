//! Built-in command handlers

mod failover;
mod hello;
mod help;
mod loop_detection;
mod model;
mod reasoning;
mod set;
mod unset;
mod workspace;

use std::sync::Arc;

use crate::commands::registry::{CommandIntrospection, CommandRegistry};
use crate::config::{CliOverrides, ModelReasoningAliases};

pub use failover::FailoverHandler;
pub use hello::HelloHandler;
pub use help::HelpHandler;
pub use loop_detection::{
    LoopDetectionHandler, ToolLoopDetectionHandler, ToolLoopMaxRepeatsHandler,
    ToolLoopModeHandler, ToolLoopTtlHandler,
};
pub use model::ModelHandler;
pub use reasoning::{ModeHandler, ProviderHandler, ReasoningAliasHandler};
pub use set::SetHandler;
pub use unset::UnsetHandler;
pub use workspace::WorkspaceHandler;

/// Read-only dependencies handed to every handler invocation.
pub struct HandlerContext<'a> {
    pub overrides: &'a CliOverrides,
    pub introspection: &'a dyn CommandIntrospection,
    pub reasoning_aliases: &'a [ModelReasoningAliases],
    /// `(backend name, model count)` for each functional backend.
    pub functional_backends: &'a [(String, usize)],
    pub command_prefix: &'a str,
}

/// Install every built-in handler into a registry.
pub fn register_all(registry: &mut CommandRegistry) {
    registry.register(Arc::new(HelloHandler));
    registry.register(Arc::new(HelpHandler));
    registry.register(Arc::new(SetHandler));
    registry.register(Arc::new(UnsetHandler));
    registry.register(Arc::new(ModelHandler));
    registry.register(Arc::new(WorkspaceHandler));

    let failover = Arc::new(FailoverHandler);
    for name in [
        "create-failover-route",
        "delete-failover-route",
        "list-failover-routes",
        "route-append",
        "route-prepend",
        "route-clear",
        "route-list",
    ] {
        registry.register_as(name, failover.clone());
    }

    registry.register(Arc::new(LoopDetectionHandler));
    registry.register(Arc::new(ToolLoopDetectionHandler));
    registry.register(Arc::new(ToolLoopModeHandler));
    registry.register(Arc::new(ToolLoopMaxRepeatsHandler));
    registry.register(Arc::new(ToolLoopTtlHandler));

    registry.register(Arc::new(ReasoningAliasHandler::max()));
    registry.register(Arc::new(ReasoningAliasHandler::medium()));
    registry.register(Arc::new(ReasoningAliasHandler::low()));
    let no_think = Arc::new(ReasoningAliasHandler::no_think());
    registry.register(no_think.clone());
    for alias in [
        "no-thinking",
        "no-reasoning",
        "disable-thinking",
        "disable-reasoning",
    ] {
        registry.register_as(alias, no_think.clone());
    }

    registry.register(Arc::new(ProviderHandler));
    registry.register(Arc::new(ModeHandler));
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::commands::registry::CommandRegistry;

    /// Owned bundle from which a `HandlerContext` can be borrowed in tests.
    pub struct ContextFixture {
        pub overrides: CliOverrides,
        pub registry: CommandRegistry,
        pub reasoning_aliases: Vec<ModelReasoningAliases>,
        pub functional_backends: Vec<(String, usize)>,
    }

    impl Default for ContextFixture {
        fn default() -> Self {
            Self {
                overrides: CliOverrides::default(),
                registry: CommandRegistry::standard(),
                reasoning_aliases: Vec::new(),
                functional_backends: Vec::new(),
            }
        }
    }

    impl ContextFixture {
        pub fn context(&self) -> HandlerContext<'_> {
            HandlerContext {
                overrides: &self.overrides,
                introspection: &self.registry,
                reasoning_aliases: &self.reasoning_aliases,
                functional_backends: &self.functional_backends,
                command_prefix: "!/",
            }
        }
    }
}
