//! Request middleware chain
//!
//! Pluggable processors applied to the message list before backend
//! dispatch. The standard chain holds one processor, `RedactionProcessor`,
//! which applies the API key redactor and then the emergency command
//! filter to each message's text content. It runs after the command system
//! has executed, so any command literal it removes is a leak.

use std::sync::Arc;

use crate::domain::chat::{ChatMessage, ContentPart, MessageContent};
use crate::redaction::{ApiKeyRedactor, ProxyCommandFilter};

/// Context information for request processing.
#[derive(Clone, Default)]
pub struct RequestContext {
    pub session_id: String,
    pub backend_type: String,
    pub model: String,
    pub redaction_enabled: bool,
    pub redactor: Option<Arc<ApiKeyRedactor>>,
    pub command_filter: Option<Arc<ProxyCommandFilter>>,
    pub client_host: Option<String>,
    pub agent: Option<String>,
    pub request_id: Option<String>,
}

/// One request processor in the middleware chain.
pub trait RequestProcessor: Send + Sync {
    fn should_process(&self, messages: &[ChatMessage], context: &RequestContext) -> bool;
    fn process(&self, messages: Vec<ChatMessage>, context: &RequestContext) -> Vec<ChatMessage>;
}

/// Ordered chain of request processors.
#[derive(Default)]
pub struct RequestMiddleware {
    processors: Vec<Box<dyn RequestProcessor>>,
}

impl RequestMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// The chain used by the pipeline: redaction only.
    pub fn standard() -> Self {
        let mut chain = Self::new();
        chain.add_processor(Box::new(RedactionProcessor));
        chain
    }

    pub fn add_processor(&mut self, processor: Box<dyn RequestProcessor>) {
        self.processors.push(processor);
    }

    pub fn process_request(
        &self,
        mut messages: Vec<ChatMessage>,
        context: &RequestContext,
    ) -> Vec<ChatMessage> {
        for processor in &self.processors {
            if processor.should_process(&messages, context) {
                messages = processor.process(messages, context);
            }
        }
        messages
    }
}

/// Applies API key redaction and command filtering to message content.
pub struct RedactionProcessor;

impl RequestProcessor for RedactionProcessor {
    fn should_process(&self, _messages: &[ChatMessage], context: &RequestContext) -> bool {
        context.redaction_enabled
            && (context.redactor.is_some() || context.command_filter.is_some())
    }

    fn process(&self, messages: Vec<ChatMessage>, context: &RequestContext) -> Vec<ChatMessage> {
        messages
            .into_iter()
            .map(|mut message| {
                if let Some(content) = message.content.take() {
                    message.content = Some(transform_content(content, |text| {
                        let mut text = text;
                        if let Some(redactor) = &context.redactor {
                            text = redactor.redact(&text);
                        }
                        if let Some(filter) = &context.command_filter {
                            text = filter.filter_commands(&text);
                        }
                        text
                    }));
                }
                message
            })
            .collect()
    }
}

fn transform_content(
    content: MessageContent,
    transform: impl Fn(String) -> String,
) -> MessageContent {
    match content {
        MessageContent::Text(text) => MessageContent::Text(transform(text)),
        MessageContent::Parts(parts) => MessageContent::Parts(
            parts
                .into_iter()
                .map(|part| match part {
                    ContentPart::Text { text } => ContentPart::Text {
                        text: transform(text),
                    },
                    other => other,
                })
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chat::ImageRef;

    fn context(redactor: bool, filter: bool) -> RequestContext {
        RequestContext {
            session_id: "s1".to_string(),
            backend_type: "openai".to_string(),
            model: "gpt-4".to_string(),
            redaction_enabled: true,
            redactor: redactor.then(|| {
                Arc::new(ApiKeyRedactor::new(vec!["sk-TESTKEYTESTKEYTESTKEY".to_string()]))
            }),
            command_filter: filter.then(|| Arc::new(ProxyCommandFilter::new("!/"))),
            client_host: None,
            agent: None,
            request_id: None,
        }
    }

    #[test]
    fn test_redaction_applied_to_string_content() {
        let chain = RequestMiddleware::standard();
        let messages = vec![ChatMessage::user("key sk-TESTKEYTESTKEYTESTKEY end")];
        let out = chain.process_request(messages, &context(true, false));
        let text = out[0].content.as_ref().unwrap().first_text().unwrap();
        assert!(!text.contains("sk-TESTKEYTESTKEYTESTKEY"));
    }

    #[test]
    fn test_filter_applied_after_redaction() {
        let chain = RequestMiddleware::standard();
        let messages = vec![ChatMessage::user("hi !/set(model=gpt-4) there")];
        let out = chain.process_request(messages, &context(false, true));
        let text = out[0].content.as_ref().unwrap().first_text().unwrap();
        assert_eq!(text, "hi there");
    }

    #[test]
    fn test_disabled_context_is_noop() {
        let chain = RequestMiddleware::standard();
        let mut ctx = context(true, true);
        ctx.redaction_enabled = false;
        let messages = vec![ChatMessage::user("key sk-TESTKEYTESTKEYTESTKEY")];
        let out = chain.process_request(messages.clone(), &ctx);
        assert_eq!(out, messages);
    }

    #[test]
    fn test_parts_content_only_text_transformed() {
        let chain = RequestMiddleware::standard();
        let messages = vec![ChatMessage {
            role: crate::domain::chat::Role::User,
            content: Some(MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "sk-TESTKEYTESTKEYTESTKEY".to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageRef {
                        url: "https://example.com/x.png".to_string(),
                    },
                },
            ])),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }];
        let out = chain.process_request(messages, &context(true, false));
        match out[0].content.as_ref().unwrap() {
            MessageContent::Parts(parts) => {
                match &parts[0] {
                    ContentPart::Text { text } => {
                        assert!(!text.contains("sk-TESTKEYTESTKEYTESTKEY"))
                    }
                    _ => panic!("expected text part"),
                }
                match &parts[1] {
                    ContentPart::ImageUrl { image_url } => {
                        assert_eq!(image_url.url, "https://example.com/x.png")
                    }
                    _ => panic!("expected image part"),
                }
            }
            _ => panic!("expected parts"),
        }
    }
}
