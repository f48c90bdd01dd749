//! Request pipeline
//!
//! The controller behind both REST surfaces: detects the agent, runs the
//! command system, applies the redaction middleware, resolves the
//! effective backend and model from session state, and dispatches with
//! failover, teeing all traffic through the wire capture.

use serde_json::Value;
use tracing::{debug, warn};

use switchboard_backends::connector::{CallContext, ResponseEnvelope};
use switchboard_core::capture::{ByteStream, CaptureTarget};
use switchboard_core::failover::{FailoverAttempt, FailoverPlanner};
use switchboard_core::middleware::RequestContext;
use switchboard_core::translation::openai as openai_translate;
use switchboard_core::{
    Agent, ChatMessage, ChatRequest, InteractionHandler, ProxyError, Result, Role, Session,
    SessionInteraction, SessionStore, Usage,
};

use crate::state::AppState;

pub struct PipelineRequest {
    pub request: ChatRequest,
    pub session_id: String,
    pub client_host: Option<String>,
    pub request_id: String,
}

pub enum PipelineOutcome {
    Complete(Value),
    Streaming(ByteStream),
}

pub async fn handle_chat_completion(
    state: &AppState,
    inbound: PipelineRequest,
) -> Result<PipelineOutcome> {
    let PipelineRequest {
        request,
        session_id,
        client_host,
        request_id,
    } = inbound;

    // Agent detection is sticky for the session lifetime.
    if let Some(agent) = Agent::detect(&request.messages) {
        state
            .sessions
            .update(
                &session_id,
                Box::new(move |session| {
                    if session.agent.is_none() {
                        session.agent = Some(agent);
                    }
                }),
            )
            .await?;
    }

    let processed = state
        .commands
        .process_commands(request.messages.clone(), &session_id)
        .await?;
    let session = state.sessions.get_or_create(&session_id).await;

    if processed.command_executed && !forward_required(&processed.modified_messages) {
        let response = state.responses.process_command_result(&processed, &session);
        consume_one_shot_flags(state, &session_id, &session).await?;
        let prompt = last_user_text(&request.messages)
            .map(|text| state.redactor.redact(&text))
            .unwrap_or_default();
        record_interaction(
            state,
            &session_id,
            SessionInteraction {
                handler: InteractionHandler::Proxy,
                prompt,
                backend: None,
                model: None,
                project: session.state.project.clone(),
                response: processed
                    .command_results
                    .first()
                    .map(|result| result.message.clone())
                    .unwrap_or_default(),
                usage: None,
            },
        )
        .await?;
        return Ok(PipelineOutcome::Complete(serde_json::to_value(&response)?));
    }

    // Loop detection updates the session's streak record even when it
    // rejects the request.
    let (streak, verdict) = switchboard_core::loop_detection::check_tool_loop(
        &processed.modified_messages,
        &session.state.loop_config,
        session.tool_loop_streak.as_ref(),
    );
    state
        .sessions
        .update(
            &session_id,
            Box::new(move |session| session.tool_loop_streak = streak),
        )
        .await?;
    verdict?;

    dispatch(state, request, processed.modified_messages, session, session_id, client_host, request_id)
        .await
}

async fn dispatch(
    state: &AppState,
    request: ChatRequest,
    messages: Vec<ChatMessage>,
    session: Session,
    session_id: String,
    client_host: Option<String>,
    request_id: String,
) -> Result<PipelineOutcome> {
    // Effective backend and model: session override beats the request's
    // `backend:` prefix, which beats the bare model, which beats the
    // configured default backend.
    let (prefix_backend, bare_model) = state.backends.split_model_prefix(&request.model);
    let backend = session
        .state
        .backend_config
        .backend_type
        .clone()
        .or(prefix_backend)
        .unwrap_or_else(|| state.backends.default_backend().to_string());
    let model = session
        .state
        .backend_config
        .model
        .clone()
        .unwrap_or(bare_model);
    if model.is_empty() {
        return Err(ProxyError::InvalidRequest("Model is required".to_string()));
    }

    if state.config.force_set_project && session.state.project.is_none() {
        return Err(ProxyError::InvalidRequest("Project name not set".to_string()));
    }

    let request = apply_session_generation_params(request, &session);

    // Redaction middleware; runs after the command system, so any command
    // literal still present is removed here as a leak.
    let redaction_enabled = session
        .state
        .redact_api_keys_in_prompts
        .unwrap_or(state.config.redact_api_keys_in_prompts);
    let context = RequestContext {
        session_id: session_id.clone(),
        backend_type: backend.clone(),
        model: model.clone(),
        redaction_enabled,
        redactor: Some(state.redactor.clone()),
        command_filter: Some(state.command_filter.clone()),
        client_host: client_host.clone(),
        agent: session.agent.map(|agent| agent.as_str().to_string()),
        request_id: Some(request_id.clone()),
    };
    let messages = state.middleware.process_request(messages, &context);

    // A model naming one of the session's failover routes expands into the
    // route's attempt plan; anything else is a single attempt.
    let attempts = match session.state.backend_config.failover_routes.get(&model) {
        Some(route) => {
            let plan = FailoverPlanner::plan(route, |name| state.backends.key_count(name));
            if plan.is_empty() {
                return Err(ProxyError::Configuration(format!(
                    "Failover route '{model}' has no elements"
                )));
            }
            plan
        }
        None => vec![FailoverAttempt {
            backend,
            model,
            key_index: None,
        }],
    };

    let prompt = last_user_text(&messages).unwrap_or_default();
    let total = attempts.len();
    let mut last_error: Option<ProxyError> = None;

    for (index, attempt) in attempts.into_iter().enumerate() {
        let is_last = index + 1 == total;

        if let Err(err) = state
            .backends
            .validate_backend_and_model(&attempt.backend, &attempt.model)
        {
            if total == 1 {
                return Err(err);
            }
            warn!(
                backend = %attempt.backend,
                model = %attempt.model,
                error = %err,
                "Skipping invalid failover element"
            );
            last_error = Some(err);
            continue;
        }

        let connector = state.backends.connector(&attempt.backend)?;
        let (key_name, api_key) = match attempt.key_index {
            Some(index) => split_key(state.backends.key_at(&attempt.backend, index)),
            None => split_key(state.backends.next_key(&attempt.backend)),
        };

        let call = CallContext {
            effective_model: attempt.model.clone(),
            api_key,
            key_name: key_name.clone(),
            project: session.state.project.clone(),
            project_dir: session.state.project_dir.clone(),
            agent: session.agent.map(|agent| agent.as_str().to_string()),
        };
        let target = CaptureTarget {
            session_id: Some(session_id.clone()),
            backend: attempt.backend.clone(),
            model: attempt.model.clone(),
            key_name,
            client_host: client_host.clone(),
            agent: session.agent.map(|agent| agent.as_str().to_string()),
            request_id: Some(request_id.clone()),
        };

        let outbound =
            openai_translate::request_to_openai(&request, &messages, &attempt.model, request.stream)?;
        state.capture.capture_outbound_request(&target, &outbound).await;

        debug!(
            backend = %attempt.backend,
            model = %attempt.model,
            attempt = index + 1,
            total,
            "Dispatching to backend"
        );

        match connector.chat_completions(&request, &messages, &call).await {
            Ok(ResponseEnvelope::Complete { body, .. }) => {
                state.capture.capture_inbound_response(&target, &body).await;
                record_interaction(
                    state,
                    &session_id,
                    SessionInteraction {
                        handler: InteractionHandler::Backend,
                        prompt,
                        backend: Some(attempt.backend),
                        model: Some(attempt.model),
                        project: session.state.project.clone(),
                        response: response_text(&body),
                        usage: response_usage(&body),
                    },
                )
                .await?;
                return Ok(PipelineOutcome::Complete(body));
            }
            Ok(ResponseEnvelope::Streaming(stream)) => {
                let wrapped = state.capture.wrap_inbound_stream(target, stream);
                record_interaction(
                    state,
                    &session_id,
                    SessionInteraction {
                        handler: InteractionHandler::Backend,
                        prompt,
                        backend: Some(attempt.backend),
                        model: Some(attempt.model),
                        project: session.state.project.clone(),
                        response: "<streaming>".to_string(),
                        usage: None,
                    },
                )
                .await?;
                return Ok(PipelineOutcome::Streaming(wrapped));
            }
            Err(err) => {
                record_interaction(
                    state,
                    &session_id,
                    SessionInteraction {
                        handler: InteractionHandler::Backend,
                        prompt: prompt.clone(),
                        backend: Some(attempt.backend.clone()),
                        model: Some(attempt.model.clone()),
                        project: session.state.project.clone(),
                        response: format!("error: {err}"),
                        usage: None,
                    },
                )
                .await?;

                if FailoverPlanner::should_retry(&err) && !is_last {
                    warn!(
                        backend = %attempt.backend,
                        model = %attempt.model,
                        error = %err,
                        "Backend attempt failed, trying next failover element"
                    );
                    last_error = Some(err);
                    continue;
                }
                return Err(err);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| ProxyError::ServiceUnavailable("All failover attempts failed".to_string())))
}

fn split_key(pair: Option<(String, String)>) -> (Option<String>, Option<String>) {
    match pair {
        Some((name, key)) => (Some(name), Some(key)),
        None => (None, None),
    }
}

/// Whether an upstream call is still warranted after command handling.
///
/// The request is command-only when the executing user message collapsed
/// to empty (or the whole list was cleared by the legacy bridge); earlier
/// messages are conversation history, not new input.
fn forward_required(messages: &[ChatMessage]) -> bool {
    match messages.iter().rev().find(|m| m.role == Role::User) {
        Some(message) => message
            .content
            .as_ref()
            .map(|content| !content.is_empty_text())
            .unwrap_or(false),
        None => false,
    }
}

fn last_user_text(messages: &[ChatMessage]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|message| message.role == Role::User)
        .and_then(|message| message.content.as_ref())
        .map(|content| content.joined_text())
}

fn apply_session_generation_params(mut request: ChatRequest, session: &Session) -> ChatRequest {
    let reasoning = &session.state.reasoning_config;
    if let Some(temperature) = reasoning.temperature {
        request.temperature = Some(temperature);
    }
    if let Some(top_p) = reasoning.top_p {
        request.top_p = Some(top_p);
    }
    if let Some(effort) = reasoning.reasoning_effort {
        request.extra_params.insert(
            "reasoning_effort".to_string(),
            Value::String(effort.as_str().to_string()),
        );
    }
    if let Some(budget) = reasoning.thinking_budget {
        request
            .extra_params
            .insert("thinking_budget".to_string(), Value::from(budget));
    }
    request
}

fn response_text(body: &Value) -> String {
    body.get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn response_usage(body: &Value) -> Option<Usage> {
    body.get("usage")
        .cloned()
        .and_then(|usage| serde_json::from_value(usage).ok())
}

/// Reset `hello_requested` and `compress_next_tool_call_reply` once the
/// reply that consumed them has been rendered.
async fn consume_one_shot_flags(
    state: &AppState,
    session_id: &str,
    session: &Session,
) -> Result<()> {
    if !session.state.hello_requested && !session.state.compress_next_tool_call_reply {
        return Ok(());
    }
    state
        .sessions
        .update(
            session_id,
            Box::new(|session| {
                session.state = session
                    .state
                    .with_hello_requested(false)
                    .with_compress_next_tool_call_reply(false);
            }),
        )
        .await?;
    Ok(())
}

async fn record_interaction(
    state: &AppState,
    session_id: &str,
    interaction: SessionInteraction,
) -> Result<()> {
    state
        .sessions
        .update(
            session_id,
            Box::new(move |session| session.record_interaction(interaction)),
        )
        .await?;
    Ok(())
}
