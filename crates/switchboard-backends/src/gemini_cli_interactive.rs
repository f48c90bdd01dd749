//! Gemini CLI interactive connector
//!
//! Keeps one long-lived `gemini` process with piped stdio for the lifetime
//! of the proxy. A prompt is written to stdin and the response is read
//! from stdout until the CLI prompt line (`> `) reappears. Model switches
//! are issued as an inline `/model <name>` directive ahead of the prompt.
//!
//! The end-of-response detector is best-effort: if the upstream CLI
//! changes its prompt format this needs adjusting.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

use switchboard_core::{ChatMessage, ChatRequest, ProxyError, Result};

use crate::connector::{BackendConnector, CallContext, ResponseEnvelope};
use crate::gemini_cli_batch::{
    build_prompt, completion_response, resolve_from_path, sanitize_env, synthesize_stream,
};

static PROMPT_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^> ").expect("static pattern"));

const DEFAULT_MODELS: &[&str] = &["gemini-2.5-pro", "gemini-2.5-flash"];
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

struct ChildIo {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

pub struct GeminiCliInteractiveConnector {
    name: String,
    google_cloud_project: Option<String>,
    process: Mutex<Option<ChildIo>>,
    functional: AtomicBool,
}

impl GeminiCliInteractiveConnector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            google_cloud_project: None,
            process: Mutex::new(None),
            functional: AtomicBool::new(false),
        }
    }

    pub fn with_google_cloud_project(mut self, project: Option<String>) -> Self {
        self.google_cloud_project = project;
        self
    }

    fn spawn_child(&self) -> Result<ChildIo> {
        let mut cmd = Command::new("gemini");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd.env_clear();
        for (key, value) in sanitize_env(std::env::vars(), self.google_cloud_project.as_deref()) {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|err| {
            ProxyError::ServiceUnavailable(format!("Failed to spawn interactive Gemini CLI: {err}"))
        })?;
        let stdin = child.stdin.take().ok_or_else(|| {
            ProxyError::Internal("Interactive Gemini CLI child has no stdin".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ProxyError::Internal("Interactive Gemini CLI child has no stdout".to_string())
        })?;

        info!(
            backend = %self.name,
            pid = child.id(),
            "Started interactive Gemini CLI backend"
        );
        Ok(ChildIo {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    /// Write the prompt and read lines until the CLI prompt reappears.
    async fn send_prompt(&self, prompt: &str, model: &str) -> Result<String> {
        let mut guard = self.process.lock().await;
        let io = guard.as_mut().ok_or_else(|| {
            ProxyError::ServiceUnavailable(
                "Interactive Gemini CLI process is not running".to_string(),
            )
        })?;

        let mut command = String::new();
        if !model.is_empty() {
            command.push_str(&format!("/model {model}\n"));
        }
        command.push_str(prompt.trim());
        command.push('\n');

        io.stdin
            .write_all(command.as_bytes())
            .await
            .map_err(|err| {
                ProxyError::ServiceUnavailable(format!("Gemini CLI stdin write failed: {err}"))
            })?;
        io.stdin.flush().await.map_err(|err| {
            ProxyError::ServiceUnavailable(format!("Gemini CLI stdin flush failed: {err}"))
        })?;

        let mut response = String::new();
        let mut line = String::new();
        loop {
            line.clear();
            let read = io.stdout.read_line(&mut line).await.map_err(|err| {
                ProxyError::ServiceUnavailable(format!("Gemini CLI stdout read failed: {err}"))
            })?;
            if read == 0 {
                // EOF: the child exited underneath us.
                self.functional.store(false, Ordering::SeqCst);
                break;
            }
            if PROMPT_LINE.is_match(&line) {
                break;
            }
            response.push_str(&line);
        }

        Ok(response.trim().to_string())
    }
}

#[async_trait]
impl BackendConnector for GeminiCliInteractiveConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<()> {
        if resolve_from_path("gemini").is_none() {
            warn!(backend = %self.name, "Gemini CLI executable not found - interactive backend disabled");
            self.functional.store(false, Ordering::SeqCst);
            return Ok(());
        }
        match self.spawn_child() {
            Ok(io) => {
                *self.process.lock().await = Some(io);
                self.functional.store(true, Ordering::SeqCst);
            }
            Err(err) => {
                warn!(backend = %self.name, error = %err, "Failed to start interactive Gemini CLI");
                self.functional.store(false, Ordering::SeqCst);
            }
        }
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
        let prompt = build_prompt(messages);
        let content = self.send_prompt(&prompt, &call.effective_model).await?;

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

    /// Terminate the child with a bounded wait, then drop the pipes.
    async fn shutdown(&self) {
        let mut guard = self.process.lock().await;
        if let Some(mut io) = guard.take() {
            let _ = io.child.start_kill();
            match tokio::time::timeout(SHUTDOWN_WAIT, io.child.wait()).await {
                Ok(_) => {}
                Err(_) => warn!(backend = %self.name, "Interactive Gemini CLI did not exit in time"),
            }
        }
        self.functional.store(false, Ordering::SeqCst);
    }
}
