//! Switchboard server - HTTP gateway over the proxy core
//!
//! Exposes the OpenAI-compatible and Gemini-compatible REST surfaces, the
//! auth middleware and the request pipeline. The binary in `main.rs` wires
//! configuration, state and graceful shutdown around the router.

pub mod auth;
pub mod error;
pub mod pipeline;
pub mod routes;
pub mod state;

pub use state::AppState;
