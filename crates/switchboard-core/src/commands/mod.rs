//! Inline command system
//!
//! Commands are directives embedded in user message text (default prefix
//! `!/`). At most one command executes per request: the latest parseable
//! command in the latest user message. All command literals are stripped
//! from the text forwarded upstream.

pub mod command;
pub mod handlers;
pub mod parser;
pub mod registry;
pub mod service;

pub use command::{Command, CommandResult};
pub use handlers::HandlerContext;
pub use parser::CommandParser;
pub use registry::{
    CommandHandler, CommandHelp, CommandIntrospection, CommandRegistry, LegacyCommandRegistry,
};
pub use service::{CommandService, ProcessedResult};
