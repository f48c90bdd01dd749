//! HTTP route handlers

pub mod gemini;
pub mod openai;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::auth::auth_middleware;
use crate::state::AppState;

/// Assemble the full router with the auth layer applied.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(openai::chat_completions))
        .route("/v1/models", get(openai::list_models))
        .route("/v1beta/models", get(gemini::list_models))
        .route("/v1beta/models/{model_action}", post(gemini::generate))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
