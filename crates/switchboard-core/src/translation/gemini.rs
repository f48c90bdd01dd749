//! Gemini REST wire format translation
//!
//! Canonical `system` maps to `systemInstruction`, `assistant` to the
//! `model` role, data-URL images to `inlineData` and remote URLs to
//! `fileData`. Tool/function messages are serialized into an ad-hoc
//! `tool_response` part; upstream acceptance of that shape is
//! implementation-specific.

use serde_json::{json, Map, Value};

use crate::domain::chat::{
    ChatMessage, ChatRequest, ChatResponse, Choice, ContentPart, MessageContent, ResponseMessage,
    Role, ToolCall, Usage,
};
use crate::error::{ProxyError, Result};

/// Build a Gemini `generateContent` request body.
pub fn request_to_gemini(request: &ChatRequest, messages: &[ChatMessage]) -> Value {
    let mut contents = Vec::new();
    let mut system_texts = Vec::new();

    for message in messages {
        let Some(content) = &message.content else {
            continue;
        };
        match message.role {
            Role::System => {
                system_texts.push(content.joined_text());
            }
            Role::Tool | Role::Function => {
                let serialized = serde_json::to_string(content)
                    .unwrap_or_else(|_| content.joined_text());
                contents.push(json!({
                    "role": "user",
                    "parts": [{
                        "text": format!("tool_code: {serialized}"),
                        "tool_response": content,
                    }]
                }));
            }
            Role::Assistant | Role::Model => {
                contents.push(json!({
                    "role": "model",
                    "parts": content_to_parts(content),
                }));
            }
            Role::User => {
                contents.push(json!({
                    "role": "user",
                    "parts": content_to_parts(content),
                }));
            }
        }
    }

    let mut body = Map::new();
    body.insert("contents".to_string(), Value::Array(contents));

    if !system_texts.is_empty() {
        body.insert(
            "systemInstruction".to_string(),
            json!({ "parts": [{ "text": system_texts.join("\n") }] }),
        );
    }

    let mut generation_config = Map::new();
    if let Some(temperature) = request.temperature {
        generation_config.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(top_p) = request.top_p {
        generation_config.insert("topP".to_string(), json!(top_p));
    }
    if let Some(max_tokens) = request.max_tokens {
        generation_config.insert("maxOutputTokens".to_string(), json!(max_tokens));
    }
    if let Some(stop) = &request.stop {
        generation_config.insert("stopSequences".to_string(), json!(stop));
    }
    if !generation_config.is_empty() {
        body.insert("generationConfig".to_string(), Value::Object(generation_config));
    }

    Value::Object(body)
}

fn content_to_parts(content: &MessageContent) -> Vec<Value> {
    match content {
        MessageContent::Text(text) => vec![json!({ "text": text })],
        MessageContent::Parts(parts) => parts.iter().map(part_to_gemini).collect(),
    }
}

fn part_to_gemini(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({ "text": text }),
        ContentPart::ImageUrl { image_url } => {
            let url = &image_url.url;
            if let Some(rest) = url.strip_prefix("data:") {
                let (mime, data) = match rest.split_once(',') {
                    Some((header, data)) => {
                        let mime = header.split(';').next().unwrap_or_default();
                        (mime.to_string(), data.to_string())
                    }
                    None => ("application/octet-stream".to_string(), String::new()),
                };
                json!({ "inlineData": { "mimeType": mime, "data": data } })
            } else {
                json!({
                    "fileData": {
                        "mimeType": "application/octet-stream",
                        "fileUri": url,
                    }
                })
            }
        }
        ContentPart::ToolResponse {
            tool_call_id,
            content,
        } => json!({
            "text": format!("tool_code: {content}"),
            "tool_response": { "tool_call_id": tool_call_id, "content": content },
        }),
    }
}

/// Parse an inbound Gemini request body into the canonical request.
pub fn request_from_gemini(model: &str, body: &Value) -> Result<ChatRequest> {
    let mut messages = Vec::new();

    if let Some(parts) = body
        .get("systemInstruction")
        .and_then(|si| si.get("parts"))
        .and_then(Value::as_array)
    {
        let text = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n");
        if !text.is_empty() {
            messages.push(ChatMessage::system(text));
        }
    }

    let contents = body
        .get("contents")
        .and_then(Value::as_array)
        .ok_or_else(|| ProxyError::InvalidRequest("Missing 'contents' array".to_string()))?;

    for content in contents {
        let role = match content.get("role").and_then(Value::as_str) {
            Some("model") => Role::Assistant,
            _ => Role::User,
        };
        let parts = content
            .get("parts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut converted = Vec::new();
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                converted.push(ContentPart::Text {
                    text: text.to_string(),
                });
            } else if let Some(inline) = part.get("inlineData") {
                let mime = inline
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .unwrap_or("application/octet-stream");
                let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
                converted.push(ContentPart::ImageUrl {
                    image_url: crate::domain::chat::ImageRef {
                        url: format!("data:{mime};base64,{data}"),
                    },
                });
            } else if let Some(file) = part.get("fileData") {
                if let Some(uri) = file.get("fileUri").and_then(Value::as_str) {
                    converted.push(ContentPart::ImageUrl {
                        image_url: crate::domain::chat::ImageRef {
                            url: uri.to_string(),
                        },
                    });
                }
            }
        }

        let content = match converted.len() {
            1 => match converted.into_iter().next() {
                Some(ContentPart::Text { text }) => MessageContent::Text(text),
                Some(part) => MessageContent::Parts(vec![part]),
                None => continue,
            },
            0 => continue,
            _ => MessageContent::Parts(converted),
        };
        messages.push(ChatMessage {
            role,
            content: Some(content),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        });
    }

    let generation = body.get("generationConfig");
    Ok(ChatRequest {
        model: model.to_string(),
        messages,
        temperature: generation
            .and_then(|g| g.get("temperature"))
            .and_then(Value::as_f64),
        top_p: generation.and_then(|g| g.get("topP")).and_then(Value::as_f64),
        max_tokens: generation
            .and_then(|g| g.get("maxOutputTokens"))
            .and_then(Value::as_u64)
            .map(|v| v as u32),
        stop: generation
            .and_then(|g| g.get("stopSequences"))
            .and_then(Value::as_array)
            .map(|stops| {
                stops
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            }),
        ..Default::default()
    })
}

/// Convert a Gemini full response into the canonical response.
pub fn response_from_gemini(data: &Value, model: &str, id: &str) -> ChatResponse {
    let mut content_text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut finish_reason = "stop".to_string();

    if let Some(candidate) = data
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
    {
        if let Some(parts) = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
        {
            for (index, part) in parts.iter().enumerate() {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    content_text.push_str(text);
                }
                if let Some(call) = part.get("functionCall") {
                    let name = call
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string();
                    let arguments = call
                        .get("args")
                        .map(|args| args.to_string())
                        .unwrap_or_else(|| "{}".to_string());
                    tool_calls.push(ToolCall::function(
                        format!("call_{id}_{index}"),
                        name,
                        arguments,
                    ));
                }
            }
        }
        finish_reason = match candidate.get("finishReason").and_then(Value::as_str) {
            Some("MAX_TOKENS") => "length".to_string(),
            Some("SAFETY") | Some("RECITATION") => "content_filter".to_string(),
            _ if !tool_calls.is_empty() => "tool_calls".to_string(),
            _ => "stop".to_string(),
        };
    }

    let usage = data.get("usageMetadata");
    let prompt_tokens = usage
        .and_then(|u| u.get("promptTokenCount"))
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    let completion_tokens = usage
        .and_then(|u| u.get("candidatesTokenCount"))
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;

    ChatResponse {
        id: id.to_string(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: Role::Assistant,
                content: if content_text.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(content_text)
                },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            },
            finish_reason: Some(finish_reason),
        }],
        usage: Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
    }
}

/// Convert one streamed Gemini object into an OpenAI-style
/// `chat.completion.chunk` frame.
pub fn stream_chunk_from_gemini(data: &Value, model: &str, id: &str, created: i64) -> Value {
    let mut delta_text = String::new();
    let mut finish_reason = Value::Null;

    if let Some(candidate) = data
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
    {
        if let Some(parts) = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
        {
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    delta_text.push_str(text);
                }
            }
        }
        if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
            finish_reason = match reason {
                "MAX_TOKENS" => json!("length"),
                "SAFETY" | "RECITATION" => json!("content_filter"),
                _ => json!("stop"),
            };
        }
    }

    json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": { "content": delta_text },
            "finish_reason": finish_reason,
        }]
    })
}

/// Convert the canonical response into a Gemini-shaped response body.
pub fn response_to_gemini(response: &ChatResponse) -> Value {
    let candidates: Vec<Value> = response
        .choices
        .iter()
        .map(|choice| {
            let finish = match choice.finish_reason.as_deref() {
                Some("length") => "MAX_TOKENS",
                Some("content_filter") => "SAFETY",
                _ => "STOP",
            };
            json!({
                "content": {
                    "parts": [{ "text": choice.message.content.clone().unwrap_or_default() }],
                    "role": "model",
                },
                "finishReason": finish,
                "index": choice.index,
            })
        })
        .collect();

    json!({
        "candidates": candidates,
        "usageMetadata": {
            "promptTokenCount": response.usage.prompt_tokens,
            "candidatesTokenCount": response.usage.completion_tokens,
            "totalTokenCount": response.usage.total_tokens,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_maps_to_system_instruction() {
        let request = ChatRequest {
            model: "gemini-2.5-pro".to_string(),
            messages: vec![
                ChatMessage::system("be terse"),
                ChatMessage::user("hello"),
            ],
            temperature: Some(0.3),
            max_tokens: Some(512),
            ..Default::default()
        };
        let body = request_to_gemini(&request, &request.messages);
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "be terse"
        );
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["generationConfig"]["temperature"], 0.3);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 512);
    }

    #[test]
    fn test_assistant_maps_to_model_role() {
        let messages = vec![
            ChatMessage::user("q"),
            ChatMessage::assistant("a"),
        ];
        let request = ChatRequest {
            messages: messages.clone(),
            ..Default::default()
        };
        let body = request_to_gemini(&request, &messages);
        assert_eq!(body["contents"][1]["role"], "model");
    }

    #[test]
    fn test_data_url_becomes_inline_data() {
        let messages = vec![ChatMessage {
            role: Role::User,
            content: Some(MessageContent::Parts(vec![ContentPart::ImageUrl {
                image_url: crate::domain::chat::ImageRef {
                    url: "data:image/png;base64,QUJD".to_string(),
                },
            }])),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }];
        let request = ChatRequest {
            messages: messages.clone(),
            ..Default::default()
        };
        let body = request_to_gemini(&request, &messages);
        let part = &body["contents"][0]["parts"][0];
        assert_eq!(part["inlineData"]["mimeType"], "image/png");
        assert_eq!(part["inlineData"]["data"], "QUJD");
    }

    #[test]
    fn test_remote_url_becomes_file_data() {
        let messages = vec![ChatMessage {
            role: Role::User,
            content: Some(MessageContent::Parts(vec![ContentPart::ImageUrl {
                image_url: crate::domain::chat::ImageRef {
                    url: "https://example.com/cat.png".to_string(),
                },
            }])),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }];
        let request = ChatRequest {
            messages: messages.clone(),
            ..Default::default()
        };
        let body = request_to_gemini(&request, &messages);
        assert_eq!(
            body["contents"][0]["parts"][0]["fileData"]["fileUri"],
            "https://example.com/cat.png"
        );
    }

    #[test]
    fn test_tool_message_serialized_as_tool_response_part() {
        let messages = vec![ChatMessage {
            role: Role::Tool,
            content: Some(MessageContent::Text("result".to_string())),
            name: None,
            tool_call_id: Some("call_1".to_string()),
            tool_calls: None,
        }];
        let request = ChatRequest {
            messages: messages.clone(),
            ..Default::default()
        };
        let body = request_to_gemini(&request, &messages);
        let part = &body["contents"][0]["parts"][0];
        assert_eq!(body["contents"][0]["role"], "user");
        assert!(part["text"].as_str().unwrap().starts_with("tool_code:"));
        assert!(part.get("tool_response").is_some());
    }

    #[test]
    fn test_request_roundtrip_over_canonical_subset() {
        let original = ChatRequest {
            model: "gemini-2.5-pro".to_string(),
            messages: vec![
                ChatMessage::system("rules"),
                ChatMessage::user("question"),
                ChatMessage::assistant("answer"),
            ],
            temperature: Some(0.7),
            top_p: Some(0.9),
            max_tokens: Some(256),
            ..Default::default()
        };
        let wire = request_to_gemini(&original, &original.messages);
        let back = request_from_gemini("gemini-2.5-pro", &wire).unwrap();

        assert_eq!(back.messages, original.messages);
        assert_eq!(back.temperature, original.temperature);
        assert_eq!(back.top_p, original.top_p);
        assert_eq!(back.max_tokens, original.max_tokens);
    }

    #[test]
    fn test_response_from_gemini() {
        let data = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{"text": "hello there"}], "role": "model" },
                "finishReason": "STOP",
            }],
            "usageMetadata": {
                "promptTokenCount": 10,
                "candidatesTokenCount": 3,
                "totalTokenCount": 13
            }
        });
        let response = response_from_gemini(&data, "gemini-2.5-pro", "chatcmpl-x");
        assert_eq!(
            response.choices[0].message.content.as_deref(),
            Some("hello there")
        );
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.prompt_tokens, 10);
        assert_eq!(response.usage.total_tokens, 13);
    }

    #[test]
    fn test_response_with_function_call() {
        let data = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [{"functionCall": {"name": "get_weather", "args": {"city": "Oslo"}}}],
                    "role": "model"
                },
            }],
        });
        let response = response_from_gemini(&data, "gemini-2.5-pro", "chatcmpl-x");
        let message = &response.choices[0].message;
        assert!(message.content.is_none());
        let calls = message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "get_weather");
        assert!(calls[0].function.arguments.contains("Oslo"));
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn test_stream_chunk_shape() {
        let data = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{"text": "chunk"}] },
            }]
        });
        let chunk = stream_chunk_from_gemini(&data, "gemini-2.5-pro", "chatcmpl-s", 1700000000);
        assert_eq!(chunk["object"], "chat.completion.chunk");
        assert_eq!(chunk["choices"][0]["delta"]["content"], "chunk");
        assert!(chunk["choices"][0]["finish_reason"].is_null());
    }

    #[test]
    fn test_response_to_gemini_shape() {
        let response = ChatResponse::assistant_text("id-1", "gemini-2.5-pro", "done");
        let body = response_to_gemini(&response);
        assert_eq!(body["candidates"][0]["content"]["parts"][0]["text"], "done");
        assert_eq!(body["candidates"][0]["finishReason"], "STOP");
        assert_eq!(body["usageMetadata"]["totalTokenCount"], 0);
    }
}
