//! Gemini CLI batch connector
//!
//! One-shot subprocess backend: the prompt is written to a `REQUEST.md`
//! file in the working directory (command lines have OS length limits) and
//! the CLI is invoked with a short reference argument. The child gets a
//! sanitized environment so proxy secrets never leak down.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use switchboard_core::capture::ByteStream;
use switchboard_core::{ChatMessage, ChatRequest, ProxyError, Result, Role};

use crate::connector::{sse_done, sse_frame, BackendConnector, CallContext, ResponseEnvelope};

const DEFAULT_MODELS: &[&str] = &[
    "gemini-1.5-pro",
    "gemini-1.5-flash",
    "gemini-2.5-pro",
    "gemini-2.5-flash",
];

const PROMPT_FILE: &str = "REQUEST.md";
const PROMPT_REFERENCE: &str = "Execute task described in ./REQUEST.md file";

/// Subprocess timeout in seconds; `GEMINI_CLI_TIMEOUT` overrides.
const DEFAULT_TIMEOUT_SECS: u64 = 600;

pub struct GeminiCliBatchConnector {
    name: String,
    google_cloud_project: Option<String>,
    functional: AtomicBool,
}

impl GeminiCliBatchConnector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            google_cloud_project: None,
            functional: AtomicBool::new(false),
        }
    }

    pub fn with_google_cloud_project(mut self, project: Option<String>) -> Self {
        self.google_cloud_project = project;
        self
    }

    async fn run_cli(&self, prompt: &str, model: &str, cwd: &Path) -> Result<String> {
        let prompt_path = cwd.join(PROMPT_FILE);
        tokio::fs::write(&prompt_path, prompt)
            .await
            .map_err(|err| {
                ProxyError::Internal(format!(
                    "Failed to write prompt file {}: {err}",
                    prompt_path.display()
                ))
            })?;

        let result = self.run_cli_inner(model, cwd).await;

        if let Err(err) = tokio::fs::remove_file(&prompt_path).await {
            debug!(path = %prompt_path.display(), error = %err, "Prompt file cleanup failed");
        }
        result
    }

    async fn run_cli_inner(&self, model: &str, cwd: &Path) -> Result<String> {
        let mut cmd = Command::new("gemini");
        cmd.arg("-m")
            .arg(model)
            .arg("-o")
            .arg("json")
            .arg("-p")
            .arg(PROMPT_REFERENCE)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.env_clear();
        for (key, value) in sanitize_env(std::env::vars(), self.google_cloud_project.as_deref()) {
            cmd.env(key, value);
        }

        let timeout = cli_timeout();
        info!(backend = %self.name, model, timeout_secs = timeout.as_secs(), "Executing Gemini CLI");

        let child = cmd.spawn().map_err(|err| {
            ProxyError::ServiceUnavailable(format!(
                "Failed to run gemini CLI: {err}. Install with: npm install -g @google/gemini-cli"
            ))
        })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(ProxyError::Internal(format!(
                    "Gemini CLI wait failed: {err}"
                )))
            }
            // kill_on_drop reaps the child when the timed-out future drops.
            Err(_) => {
                return Err(ProxyError::Backend {
                    backend: self.name.clone(),
                    status: 504,
                    message: format!(
                        "Gemini CLI command timed out after {} seconds",
                        timeout.as_secs()
                    ),
                    retry_after_secs: None,
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProxyError::Backend {
                backend: self.name.clone(),
                status: 502,
                message: format!("Gemini CLI error: {stderr}"),
                retry_after_secs: None,
            });
        }

        parse_cli_output(&String::from_utf8_lossy(&output.stdout))
    }
}

fn cli_timeout() -> Duration {
    let secs = std::env::var("GEMINI_CLI_TIMEOUT")
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Build the child environment from scratch: PATH and home for executable
/// resolution, proxy and temp variables, Windows app-data paths, and the
/// generic Google key. Proxy-specific secrets are intentionally absent.
pub(crate) fn sanitize_env(
    vars: impl Iterator<Item = (String, String)>,
    google_cloud_project: Option<&str>,
) -> Vec<(String, String)> {
    const KEEP: &[&str] = &[
        "PATH",
        "HOME",
        "USERPROFILE",
        "HTTP_PROXY",
        "HTTPS_PROXY",
        "NO_PROXY",
        "http_proxy",
        "https_proxy",
        "no_proxy",
        "TMP",
        "TEMP",
        "APPDATA",
        "LOCALAPPDATA",
        "PROGRAMDATA",
        "SYSTEMROOT",
        "WINDIR",
        "PATHEXT",
        "GOOGLE_API_KEY",
    ];

    let mut env: Vec<(String, String)> = vars
        .filter(|(name, _)| KEEP.contains(&name.as_str()))
        .collect();
    if let Some(project) = google_cloud_project {
        env.push(("GOOGLE_CLOUD_PROJECT".to_string(), project.to_string()));
    }
    env
}

/// Prompt text for the CLI: every non-system message joined by blank lines.
pub(crate) fn build_prompt(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .filter(|message| message.role != Role::System)
        .filter_map(|message| message.content.as_ref())
        .map(|content| content.joined_text())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn parse_cli_output(output: &str) -> Result<String> {
    let value: Value = serde_json::from_str(output.trim()).map_err(|err| {
        ProxyError::Internal(format!("Failed to parse Gemini CLI output: {err}"))
    })?;

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return Err(ProxyError::Backend {
            backend: "gemini-cli-batch".to_string(),
            status: 502,
            message: format!("Gemini CLI error: {error}"),
            retry_after_secs: None,
        });
    }

    let response = value
        .get("response")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ProxyError::Internal("Gemini CLI output missing 'response' field".to_string())
        })?;
    if response.trim().is_empty() {
        return Err(ProxyError::Internal(
            "Gemini CLI returned empty output".to_string(),
        ));
    }
    Ok(response.to_string())
}

/// OpenAI-shaped response for a subprocess reply.
pub(crate) fn completion_response(model: &str, content: &str) -> Value {
    json!({
        "id": format!("chatcmpl-geminicli-{}", &Uuid::new_v4().simple().to_string()[..16]),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop",
        }],
        "usage": { "prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0 },
    })
}

/// Two-frame SSE rendition of a complete reply, ending in `[DONE]`.
pub(crate) fn synthesize_stream(model: &str, content: &str) -> ByteStream {
    let id = format!("chatcmpl-geminicli-{}", &Uuid::new_v4().simple().to_string()[..16]);
    let created = chrono::Utc::now().timestamp();
    let content_chunk = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{ "index": 0, "delta": { "content": content }, "finish_reason": null }],
    });
    let final_chunk = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{ "index": 0, "delta": {}, "finish_reason": "stop" }],
    });

    Box::pin(futures::stream::iter(vec![
        Ok(sse_frame(&content_chunk)),
        Ok(sse_frame(&final_chunk)),
        Ok(sse_done()),
    ]))
}

/// Reply shown when the backend is used without a configured project dir.
pub(crate) fn project_required_reply(name: &str) -> String {
    format!(
        "To use {name}, you need to set the project-dir first. \
         Use the !/set(project-dir=...) command to configure the workspace."
    )
}

#[async_trait]
impl BackendConnector for GeminiCliBatchConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<()> {
        let found = resolve_from_path("gemini").is_some();
        if !found {
            warn!(backend = %self.name, "Gemini CLI executable not found - backend disabled");
        }
        self.functional.store(found, Ordering::SeqCst);
        Ok(())
    }

    fn is_functional(&self) -> bool {
        self.functional.load(Ordering::SeqCst)
    }

    fn available_models(&self) -> Vec<String> {
        if !self.is_functional() {
            return Vec::new();
        }
        DEFAULT_MODELS.iter().map(|m| m.to_string()).collect()
    }

    async fn chat_completions(
        &self,
        request: &ChatRequest,
        messages: &[ChatMessage],
        call: &CallContext,
    ) -> Result<ResponseEnvelope> {
        // The working directory IS the configured project dir; without one
        // there is nowhere sensible to run the CLI.
        let Some(cwd) = call.project_dir.clone() else {
            let reply = project_required_reply(&self.name);
            if request.stream {
                return Ok(ResponseEnvelope::Streaming(synthesize_stream(
                    &call.effective_model,
                    &reply,
                )));
            }
            return Ok(ResponseEnvelope::complete(completion_response(
                &call.effective_model,
                &reply,
            )));
        };

        let prompt = build_prompt(messages);
        let content = self.run_cli(&prompt, &call.effective_model, &cwd).await?;

        if request.stream {
            return Ok(ResponseEnvelope::Streaming(synthesize_stream(
                &call.effective_model,
                &content,
            )));
        }
        Ok(ResponseEnvelope::complete(completion_response(
            &call.effective_model,
            &content,
        )))
    }
}

/// Search PATH for an executable by name.
pub(crate) fn resolve_from_path(name: &str) -> Option<PathBuf> {
    let path_value = std::env::var_os("PATH")?;
    for entry in std::env::split_paths(&path_value) {
        let candidate = entry.join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

pub(crate) fn is_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|metadata| metadata.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        true
    }
}
