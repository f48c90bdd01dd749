//! Wire capture
//!
//! Append-only structured JSON log of every outbound request, inbound
//! response and streamed chunk, with redacted payloads. Two
//! implementations share the interface: `BufferedWireCapture` (batched
//! writes, background flush, rotation) and `StructuredWireCapture`
//! (one write per entry).

pub mod buffered;
pub mod structured;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::Stream;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::redaction::ApiKeyRedactor;

pub use buffered::BufferedWireCapture;
pub use structured::StructuredWireCapture;

/// Finite lazy byte sequence flowing back to the client.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// One line of the capture file.
#[derive(Debug, Clone, Serialize)]
pub struct WireCaptureEntry {
    pub timestamp_iso: String,
    pub timestamp_unix: f64,
    pub direction: String,
    pub source: String,
    pub destination: String,
    pub session_id: Option<String>,
    pub backend: String,
    pub model: String,
    pub key_name: Option<String>,
    pub content_type: String,
    pub content_length: usize,
    pub payload: Value,
    pub metadata: Value,
}

/// Addressing information for capture entries of one exchange.
#[derive(Debug, Clone, Default)]
pub struct CaptureTarget {
    pub session_id: Option<String>,
    pub backend: String,
    pub model: String,
    /// Logical key label, never the key material itself.
    pub key_name: Option<String>,
    pub client_host: Option<String>,
    pub agent: Option<String>,
    pub request_id: Option<String>,
}

#[async_trait]
pub trait WireCapture: Send + Sync {
    fn enabled(&self) -> bool;

    async fn capture_outbound_request(&self, target: &CaptureTarget, payload: &Value);

    async fn capture_inbound_response(&self, target: &CaptureTarget, payload: &Value);

    /// Tee a streaming response: emits `stream_start`, per-chunk
    /// `stream_chunk` and a final `stream_end` entry while forwarding the
    /// bytes unchanged.
    fn wrap_inbound_stream(&self, target: CaptureTarget, stream: ByteStream) -> ByteStream;

    async fn flush(&self);

    async fn shutdown(&self);
}

/// Disabled capture sink.
pub struct NoopWireCapture;

#[async_trait]
impl WireCapture for NoopWireCapture {
    fn enabled(&self) -> bool {
        false
    }

    async fn capture_outbound_request(&self, _target: &CaptureTarget, _payload: &Value) {}

    async fn capture_inbound_response(&self, _target: &CaptureTarget, _payload: &Value) {}

    fn wrap_inbound_stream(&self, _target: CaptureTarget, stream: ByteStream) -> ByteStream {
        stream
    }

    async fn flush(&self) {}

    async fn shutdown(&self) {}
}

fn client_info(target: &CaptureTarget) -> String {
    match (&target.client_host, &target.agent) {
        (Some(host), Some(agent)) => format!("{host}({agent})"),
        (Some(host), None) => host.clone(),
        (None, Some(agent)) => format!("unknown_host({agent})"),
        (None, None) => "unknown_client".to_string(),
    }
}

/// Recursively redact every string inside a payload.
fn redact_payload(redactor: &ApiKeyRedactor, payload: &Value) -> Value {
    match payload {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), redact_payload(redactor, value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| redact_payload(redactor, item))
                .collect(),
        ),
        Value::String(text) => Value::String(redactor.redact(text)),
        other => other.clone(),
    }
}

fn content_kind(payload: &Value) -> (&'static str, usize) {
    match payload {
        Value::Object(_) | Value::Array(_) => {
            let length = serde_json::to_string(payload).map(|s| s.len()).unwrap_or(0);
            ("json", length)
        }
        Value::String(text) => ("text", text.len()),
        other => ("object", other.to_string().len()),
    }
}

pub(crate) fn make_entry(
    redactor: &ApiKeyRedactor,
    direction: &str,
    source: String,
    destination: String,
    target: &CaptureTarget,
    payload: &Value,
    extra_metadata: Option<Value>,
) -> WireCaptureEntry {
    let now = Utc::now();
    let (content_type, content_length) = content_kind(payload);

    let mut metadata = json!({
        "client_host": target.client_host,
        "user_agent": target.agent,
        "request_id": target.request_id,
    });
    if let (Some(base), Some(Value::Object(extra))) = (metadata.as_object_mut(), extra_metadata) {
        for (key, value) in extra {
            base.insert(key, value);
        }
    }

    WireCaptureEntry {
        timestamp_iso: now.to_rfc3339(),
        timestamp_unix: now.timestamp_millis() as f64 / 1000.0,
        direction: direction.to_string(),
        source,
        destination,
        session_id: target.session_id.clone(),
        backend: target.backend.clone(),
        model: target.model.clone(),
        key_name: target.key_name.clone(),
        content_type: content_type.to_string(),
        content_length,
        payload: redact_payload(redactor, payload),
        metadata,
    }
}

pub(crate) fn outbound_entry(
    redactor: &ApiKeyRedactor,
    target: &CaptureTarget,
    payload: &Value,
) -> WireCaptureEntry {
    make_entry(
        redactor,
        "outbound_request",
        client_info(target),
        target.backend.clone(),
        target,
        payload,
        None,
    )
}

pub(crate) fn inbound_entry(
    redactor: &ApiKeyRedactor,
    target: &CaptureTarget,
    payload: &Value,
) -> WireCaptureEntry {
    make_entry(
        redactor,
        "inbound_response",
        target.backend.clone(),
        client_info(target),
        target,
        payload,
        None,
    )
}

/// Shared recorder trait so the stream wrapper works for both sinks.
pub(crate) trait EntryRecorder: Send + Sync + 'static {
    fn record(&self, entry: WireCaptureEntry);
    fn redactor(&self) -> &ApiKeyRedactor;
}

pub(crate) fn wrap_stream<R: EntryRecorder>(
    recorder: Arc<R>,
    target: CaptureTarget,
    mut stream: ByteStream,
) -> ByteStream {
    use futures::StreamExt;

    Box::pin(async_stream::stream! {
        recorder.record(make_entry(
            recorder.redactor(),
            "stream_start",
            target.backend.clone(),
            client_info(&target),
            &target,
            &json!({ "stream_type": "inbound_response" }),
            None,
        ));

        let mut total_bytes: usize = 0;
        let mut chunk_count: usize = 0;

        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    chunk_count += 1;
                    total_bytes += chunk.len();
                    let chunk_text = String::from_utf8_lossy(&chunk).into_owned();
                    recorder.record(make_entry(
                        recorder.redactor(),
                        "stream_chunk",
                        target.backend.clone(),
                        client_info(&target),
                        &target,
                        &Value::String(chunk_text),
                        Some(json!({ "chunk_number": chunk_count, "chunk_bytes": chunk.len() })),
                    ));
                    yield Ok(chunk);
                }
                Err(err) => {
                    yield Err(err);
                    break;
                }
            }
        }

        recorder.record(make_entry(
            recorder.redactor(),
            "stream_end",
            target.backend.clone(),
            client_info(&target),
            &target,
            &json!({ "total_bytes": total_bytes, "total_chunks": chunk_count }),
            None,
        ));
    })
}
