//! Structured wire capture
//!
//! The simpler sibling of `BufferedWireCapture`: every entry is written to
//! the file immediately. Useful for debugging sessions where losing
//! buffered entries on a crash is unacceptable.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::debug;

use crate::capture::{
    inbound_entry, make_entry, outbound_entry, wrap_stream, ByteStream, CaptureTarget,
    EntryRecorder, WireCapture, WireCaptureEntry,
};
use crate::redaction::ApiKeyRedactor;

struct Inner {
    path: PathBuf,
    redactor: Arc<ApiKeyRedactor>,
    write_lock: Mutex<()>,
    enabled: AtomicBool,
}

pub struct StructuredWireCapture {
    inner: Arc<Inner>,
}

impl StructuredWireCapture {
    pub fn new(path: impl Into<PathBuf>, redactor: Arc<ApiKeyRedactor>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let inner = Arc::new(Inner {
            path,
            redactor,
            write_lock: Mutex::new(()),
            enabled: AtomicBool::new(false),
        });

        let header = make_entry(
            &inner.redactor,
            "system_init",
            "wire_capture_service".to_string(),
            "file_system".to_string(),
            &CaptureTarget {
                backend: "system".to_string(),
                model: "system".to_string(),
                ..Default::default()
            },
            &json!({
                "message": "Wire capture initialized",
                "format_version": "structured_v1",
            }),
            Some(json!({ "implementation": "StructuredWireCapture" })),
        );
        inner.write_entry(&header)?;
        inner.enabled.store(true, Ordering::SeqCst);

        Ok(Self { inner })
    }
}

impl Inner {
    fn write_entry(&self, entry: &WireCaptureEntry) -> std::io::Result<()> {
        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(entry).unwrap_or_else(|_| "{}".to_string());
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()
    }
}

impl EntryRecorder for Inner {
    fn record(&self, entry: WireCaptureEntry) {
        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.write_entry(&entry) {
            debug!(error = %err, "Wire capture write failed");
        }
    }

    fn redactor(&self) -> &ApiKeyRedactor {
        &self.redactor
    }
}

#[async_trait]
impl WireCapture for StructuredWireCapture {
    fn enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    async fn capture_outbound_request(&self, target: &CaptureTarget, payload: &Value) {
        if !self.enabled() {
            return;
        }
        self.inner
            .record(outbound_entry(&self.inner.redactor, target, payload));
    }

    async fn capture_inbound_response(&self, target: &CaptureTarget, payload: &Value) {
        if !self.enabled() {
            return;
        }
        self.inner
            .record(inbound_entry(&self.inner.redactor, target, payload));
    }

    fn wrap_inbound_stream(&self, target: CaptureTarget, stream: ByteStream) -> ByteStream {
        if !self.enabled() {
            return stream;
        }
        wrap_stream(self.inner.clone(), target, stream)
    }

    async fn flush(&self) {}

    async fn shutdown(&self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_written_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.log");
        let capture =
            StructuredWireCapture::new(&path, Arc::new(ApiKeyRedactor::new(Vec::<String>::new())))
                .unwrap();

        let target = CaptureTarget {
            backend: "gemini".to_string(),
            model: "gemini-2.5-pro".to_string(),
            ..Default::default()
        };
        capture
            .capture_outbound_request(&target, &json!({"q": "hi"}))
            .await;

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let entry: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(entry["direction"], "outbound_request");
        assert_eq!(entry["backend"], "gemini");
    }
}
