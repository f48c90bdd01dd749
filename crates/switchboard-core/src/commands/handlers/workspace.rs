//! The `workspace` command
//!
//! Reads or changes the session's project directory, used as the working
//! directory of subprocess backends.

use std::path::PathBuf;

use tracing::info;

use crate::commands::command::{Command, CommandResult};
use crate::commands::handlers::HandlerContext;
use crate::commands::registry::CommandHandler;
use crate::domain::session::Session;
use crate::util::expand_path;

pub struct WorkspaceHandler;

impl CommandHandler for WorkspaceHandler {
    fn command_name(&self) -> &'static str {
        "workspace"
    }

    fn description(&self) -> &'static str {
        "Read or set the workspace directory for subprocess backends."
    }

    fn format(&self) -> &'static str {
        "workspace(path)"
    }

    fn examples(&self) -> &'static [&'static str] {
        &["!/workspace(/home/user/project)", "!/workspace(~/myproject)"]
    }

    fn handle(
        &self,
        command: &Command,
        session: &Session,
        _ctx: &HandlerContext<'_>,
    ) -> CommandResult {
        let path = command
            .arg_or_positional("path")
            .map(str::trim)
            .filter(|path| !path.is_empty());

        let Some(path) = path else {
            return match &session.state.project_dir {
                Some(dir) => {
                    CommandResult::ok(format!("Current workspace: {}", dir.display()))
                        .named("workspace")
                }
                None => CommandResult::ok("No workspace set (using backend default)")
                    .named("workspace"),
            };
        };

        let expanded = expand_path(path);
        let candidate = PathBuf::from(&expanded);
        if !candidate.is_dir() {
            return CommandResult::fail(format!("Workspace directory not found: {expanded}"))
                .named("workspace");
        }

        let absolute = candidate.canonicalize().unwrap_or(candidate);
        info!(workspace = %absolute.display(), "Workspace changed");
        let message = format!("Workspace set to: {}", absolute.display());
        let new_state = session.state.with_project_dir(Some(absolute));
        CommandResult::ok_with_state(message, new_state).named("workspace")
    }
}
