//! Anthropic messages wire format translation
//!
//! System messages are lifted into the top-level `system` field, tool
//! results become `tool_result` content blocks on a user turn, and
//! assistant tool calls become `tool_use` blocks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::chat::{
    ChatMessage, ChatRequest, ChatResponse, Choice, ResponseMessage, Role, ToolCall, Usage,
};
use crate::error::{ProxyError, Result};

const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicContentBlock>),
}

#[derive(Serialize, Default)]
struct AnthropicContentBlock {
    r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_use_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input: Option<Value>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<AnthropicResponseContent>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicResponseContent {
    r#type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

/// Build an Anthropic `/v1/messages` request body.
pub fn request_to_anthropic(
    request: &ChatRequest,
    messages: &[ChatMessage],
    effective_model: &str,
    stream: bool,
) -> Result<Value> {
    let system_texts: Vec<String> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .filter_map(|m| m.content.as_ref().map(|c| c.joined_text()))
        .collect();
    let system = if system_texts.is_empty() {
        None
    } else {
        Some(system_texts.join("\n"))
    };

    let converted: Vec<AnthropicMessage> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(convert_message)
        .collect();

    let body = AnthropicRequest {
        model: effective_model.to_string(),
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system,
        messages: converted,
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop.clone(),
        stream: stream.then_some(true),
    };
    Ok(serde_json::to_value(&body)?)
}

fn convert_message(message: &ChatMessage) -> AnthropicMessage {
    let role = match message.role {
        Role::Assistant | Role::Model => "assistant",
        _ => "user",
    }
    .to_string();

    let text = message
        .content
        .as_ref()
        .map(|content| content.joined_text())
        .unwrap_or_default();

    let content = if matches!(message.role, Role::Tool | Role::Function) {
        AnthropicContent::Blocks(vec![AnthropicContentBlock {
            r#type: "tool_result".to_string(),
            tool_use_id: message.tool_call_id.clone(),
            content: Some(text),
            ..Default::default()
        }])
    } else if let Some(tool_calls) = &message.tool_calls {
        let mut blocks = Vec::new();
        if !text.is_empty() {
            blocks.push(AnthropicContentBlock {
                r#type: "text".to_string(),
                text: Some(text),
                ..Default::default()
            });
        }
        for call in tool_calls {
            let input = serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::Object(Default::default()));
            blocks.push(AnthropicContentBlock {
                r#type: "tool_use".to_string(),
                id: Some(call.id.clone()),
                name: Some(call.function.name.clone()),
                input: Some(input),
                ..Default::default()
            });
        }
        AnthropicContent::Blocks(blocks)
    } else {
        AnthropicContent::Text(text)
    };

    AnthropicMessage { role, content }
}

/// Convert an Anthropic response body into the canonical response.
pub fn response_from_anthropic(value: Value) -> Result<ChatResponse> {
    let data: AnthropicResponse = serde_json::from_value(value)
        .map_err(|err| ProxyError::Internal(format!("Malformed Anthropic response: {err}")))?;

    let mut content: Option<String> = None;
    let mut tool_calls = Vec::new();
    for block in data.content {
        match block.r#type.as_str() {
            "text" => content = block.text,
            "tool_use" => {
                if let (Some(id), Some(name)) = (block.id, block.name) {
                    let arguments = block
                        .input
                        .map(|input| input.to_string())
                        .unwrap_or_else(|| "{}".to_string());
                    tool_calls.push(ToolCall::function(id, name, arguments));
                }
            }
            _ => {}
        }
    }

    let finish_reason = match data.stop_reason.as_deref() {
        Some("tool_use") => "tool_calls",
        Some("max_tokens") => "length",
        _ => "stop",
    };

    Ok(ChatResponse {
        id: data.id,
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: data.model,
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: Role::Assistant,
                content,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            },
            finish_reason: Some(finish_reason.to_string()),
        }],
        usage: Usage {
            prompt_tokens: data.usage.input_tokens,
            completion_tokens: data.usage.output_tokens,
            total_tokens: data.usage.input_tokens + data.usage.output_tokens,
        },
    })
}
