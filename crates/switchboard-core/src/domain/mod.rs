//! Domain model: canonical chat types and the per-client session

pub mod chat;
pub mod session;
