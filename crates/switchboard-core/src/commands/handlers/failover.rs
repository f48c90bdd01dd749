//! Failover route commands
//!
//! One handler serves the whole family; the executed command name selects
//! the operation.

use crate::commands::command::{Command, CommandResult};
use crate::commands::handlers::HandlerContext;
use crate::commands::registry::CommandHandler;
use crate::domain::session::Session;
use crate::failover::{parse_route_element, FailoverPolicy};

pub struct FailoverHandler;

impl CommandHandler for FailoverHandler {
    fn command_name(&self) -> &'static str {
        "failover"
    }

    fn description(&self) -> &'static str {
        "Manage failover routes."
    }

    fn format(&self) -> &'static str {
        "create-failover-route(name=..., policy=k|m|km|mk)"
    }

    fn examples(&self) -> &'static [&'static str] {
        &[
            "!/create-failover-route(name=myroute, policy=m)",
            "!/route-append(name=myroute, element=openai:gpt-4)",
            "!/route-list(name=myroute)",
            "!/list-failover-routes",
            "!/delete-failover-route(name=myroute)",
        ]
    }

    fn handle(
        &self,
        command: &Command,
        session: &Session,
        _ctx: &HandlerContext<'_>,
    ) -> CommandResult {
        let result = match command.name.as_str() {
            "create-failover-route" => create_route(command, session),
            "delete-failover-route" => delete_route(command, session),
            "list-failover-routes" => list_routes(session),
            "route-append" => mutate_elements(command, session, ElementOp::Append),
            "route-prepend" => mutate_elements(command, session, ElementOp::Prepend),
            "route-clear" => clear_route(command, session),
            "route-list" => list_route(command, session),
            other => CommandResult::fail(format!("Unknown failover command: {other}")),
        };
        result.named(command.name.clone())
    }
}

enum ElementOp {
    Append,
    Prepend,
}

fn route_name<'c>(command: &'c Command) -> Result<&'c str, CommandResult> {
    command
        .arg_or_positional("name")
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| CommandResult::fail("Route name is required."))
}

fn create_route(command: &Command, session: &Session) -> CommandResult {
    let name = match route_name(command) {
        Ok(name) => name,
        Err(result) => return result,
    };
    let policy_raw = match command.arg("policy") {
        Some(policy) => policy,
        None => return CommandResult::fail("Route policy is required."),
    };
    let Some(policy) = FailoverPolicy::parse(policy_raw) else {
        return CommandResult::fail(format!(
            "Invalid policy '{policy_raw}'. Valid policies: k, m, km, mk"
        ));
    };

    let backend_config = session
        .state
        .backend_config
        .with_failover_route(name, policy);
    let new_state = session.state.with_backend_config(backend_config);
    CommandResult::ok_with_state(
        format!("Failover route '{name}' created with policy {}", policy.as_str()),
        new_state,
    )
}

fn delete_route(command: &Command, session: &Session) -> CommandResult {
    let name = match route_name(command) {
        Ok(name) => name,
        Err(result) => return result,
    };
    if !session.state.backend_config.failover_routes.contains_key(name) {
        return CommandResult::fail(format!("Failover route '{name}' not found."));
    }
    let backend_config = session.state.backend_config.without_failover_route(name);
    let new_state = session.state.with_backend_config(backend_config);
    CommandResult::ok_with_state(format!("Failover route '{name}' deleted"), new_state)
}

fn list_routes(session: &Session) -> CommandResult {
    let routes = &session.state.backend_config.failover_routes;
    if routes.is_empty() {
        return CommandResult::ok("No failover routes defined.");
    }
    let lines: Vec<String> = routes
        .iter()
        .map(|(name, route)| {
            format!(
                "{name}: {} ({} elements)",
                route.policy.as_str(),
                route.elements.len()
            )
        })
        .collect();
    CommandResult::ok(lines.join("\n"))
}

fn mutate_elements(command: &Command, session: &Session, op: ElementOp) -> CommandResult {
    let name = match route_name(command) {
        Ok(name) => name,
        Err(result) => return result,
    };
    let element = match command.arg("element") {
        Some(element) => element.trim(),
        None => return CommandResult::fail("Route element is required."),
    };
    if parse_route_element(element).is_none() {
        return CommandResult::fail(format!(
            "Invalid route element '{element}'. Expected backend:model."
        ));
    }
    if !session.state.backend_config.failover_routes.contains_key(name) {
        return CommandResult::fail(format!("Failover route '{name}' not found."));
    }

    let (backend_config, verb) = match op {
        ElementOp::Append => (
            session
                .state
                .backend_config
                .with_appended_route_element(name, element),
            "appended to",
        ),
        ElementOp::Prepend => (
            session
                .state
                .backend_config
                .with_prepended_route_element(name, element),
            "prepended to",
        ),
    };
    let new_state = session.state.with_backend_config(backend_config);
    CommandResult::ok_with_state(format!("Element {element} {verb} route '{name}'"), new_state)
}

fn clear_route(command: &Command, session: &Session) -> CommandResult {
    let name = match route_name(command) {
        Ok(name) => name,
        Err(result) => return result,
    };
    if !session.state.backend_config.failover_routes.contains_key(name) {
        return CommandResult::fail(format!("Failover route '{name}' not found."));
    }
    let backend_config = session.state.backend_config.with_cleared_route(name);
    let new_state = session.state.with_backend_config(backend_config);
    CommandResult::ok_with_state(format!("Route '{name}' cleared"), new_state)
}

fn list_route(command: &Command, session: &Session) -> CommandResult {
    let name = match route_name(command) {
        Ok(name) => name,
        Err(result) => return result,
    };
    let Some(route) = session.state.backend_config.failover_routes.get(name) else {
        return CommandResult::fail(format!("Failover route '{name}' not found."));
    };
    let elements = if route.elements.is_empty() {
        "empty".to_string()
    } else {
        route.elements.join(", ")
    };
    CommandResult::ok(format!(
        "Route '{name}' (policy {}): {elements}",
        route.policy.as_str()
    ))
}
