//! Buffered wire capture
//!
//! Entries accumulate in an in-memory buffer under a mutex and are flushed
//! when the buffer reaches the entry limit, when the flush interval
//! elapses, or on shutdown. A background task drives the timed flush.
//! Writes happen outside the buffer lock (snapshot-and-flush). Rotation
//! renames `file.k` to `file.k+1` with the oldest generation pruned.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::capture::{
    inbound_entry, make_entry, outbound_entry, wrap_stream, ByteStream, CaptureTarget,
    EntryRecorder, WireCapture, WireCaptureEntry,
};
use crate::config::LoggingSection;
use crate::redaction::ApiKeyRedactor;

pub(crate) const FORMAT_VERSION: &str = "buffered_v1";

struct Inner {
    path: PathBuf,
    redactor: Arc<ApiKeyRedactor>,
    buffer: Mutex<Vec<WireCaptureEntry>>,
    last_flush: Mutex<Instant>,
    max_entries_per_flush: usize,
    flush_interval: Duration,
    max_bytes: Option<u64>,
    max_files: usize,
    enabled: AtomicBool,
}

pub struct BufferedWireCapture {
    inner: Arc<Inner>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl BufferedWireCapture {
    /// Open the capture file, write the `system_init` header entry and
    /// start the background flush task.
    pub fn new(
        path: impl Into<PathBuf>,
        redactor: Arc<ApiKeyRedactor>,
        logging: &LoggingSection,
    ) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let inner = Arc::new(Inner {
            path,
            redactor,
            buffer: Mutex::new(Vec::new()),
            last_flush: Mutex::new(Instant::now()),
            max_entries_per_flush: logging.capture_max_entries_per_flush.max(1),
            flush_interval: Duration::from_secs_f64(logging.capture_flush_interval_secs.max(0.05)),
            max_bytes: logging.capture_max_bytes,
            max_files: logging.capture_max_files,
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
                "format_version": FORMAT_VERSION,
            }),
            Some(json!({
                "max_entries_per_flush": inner.max_entries_per_flush,
                "flush_interval_secs": inner.flush_interval.as_secs_f64(),
                "implementation": "BufferedWireCapture",
            })),
        );
        inner.write_entries(&[header])?;
        inner.enabled.store(true, Ordering::SeqCst);

        let background = inner.clone();
        let flush_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(background.flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !background.enabled.load(Ordering::SeqCst) {
                    break;
                }
                background.flush_now();
            }
        });

        Ok(Self {
            inner,
            flush_task: Mutex::new(Some(flush_task)),
        })
    }
}

impl Inner {
    fn record(&self, entry: WireCaptureEntry) {
        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }
        let should_flush = {
            let mut buffer = self.buffer.lock();
            buffer.push(entry);
            buffer.len() >= self.max_entries_per_flush
                || self.last_flush.lock().elapsed() >= self.flush_interval
        };
        if should_flush {
            self.flush_now();
        }
    }

    /// Snapshot the buffer under the lock; write outside it.
    fn flush_now(&self) {
        let entries = {
            let mut buffer = self.buffer.lock();
            if buffer.is_empty() {
                *self.last_flush.lock() = Instant::now();
                return;
            }
            std::mem::take(&mut *buffer)
        };
        *self.last_flush.lock() = Instant::now();
        if let Err(err) = self.write_entries(&entries) {
            debug!(error = %err, "Wire capture write failed");
        }
    }

    fn write_entries(&self, entries: &[WireCaptureEntry]) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for entry in entries {
            let line = serde_json::to_string(entry)
                .unwrap_or_else(|_| "{}".to_string());
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
        }
        file.flush()?;
        drop(file);

        self.maybe_rotate()?;
        Ok(())
    }

    fn maybe_rotate(&self) -> std::io::Result<()> {
        let Some(max_bytes) = self.max_bytes else {
            return Ok(());
        };
        let size = match std::fs::metadata(&self.path) {
            Ok(metadata) => metadata.len(),
            Err(_) => return Ok(()),
        };
        if size <= max_bytes {
            return Ok(());
        }

        if self.max_files == 0 {
            std::fs::remove_file(&self.path)?;
            return Ok(());
        }

        for index in (1..=self.max_files).rev() {
            let src = generation_path(&self.path, index);
            if !src.exists() {
                continue;
            }
            if index == self.max_files {
                std::fs::remove_file(&src)?;
            } else {
                std::fs::rename(&src, generation_path(&self.path, index + 1))?;
            }
        }
        std::fs::rename(&self.path, generation_path(&self.path, 1))?;
        Ok(())
    }
}

fn generation_path(path: &Path, index: usize) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(format!(".{index}"));
    PathBuf::from(os)
}

impl EntryRecorder for Inner {
    fn record(&self, entry: WireCaptureEntry) {
        Inner::record(self, entry)
    }

    fn redactor(&self) -> &ApiKeyRedactor {
        &self.redactor
    }
}

#[async_trait]
impl WireCapture for BufferedWireCapture {
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

    async fn flush(&self) {
        self.inner.flush_now();
    }

    async fn shutdown(&self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
        if let Some(task) = self.flush_task.lock().take() {
            task.abort();
        }
        // Final synchronous flush of whatever is still buffered.
        let entries = std::mem::take(&mut *self.inner.buffer.lock());
        if !entries.is_empty() {
            let _ = self.inner.write_entries(&entries);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn logging(max_bytes: Option<u64>, max_files: usize) -> LoggingSection {
        LoggingSection {
            capture_file: None,
            capture_max_entries_per_flush: 2,
            capture_flush_interval_secs: 60.0,
            capture_max_bytes: max_bytes,
            capture_max_files: max_files,
        }
    }

    fn read_lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn target() -> CaptureTarget {
        CaptureTarget {
            session_id: Some("s1".to_string()),
            backend: "openai".to_string(),
            model: "gpt-4".to_string(),
            key_name: Some("openai-1".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_system_init_header_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.log");
        let capture = BufferedWireCapture::new(
            &path,
            Arc::new(ApiKeyRedactor::new(Vec::<String>::new())),
            &logging(None, 0),
        )
        .unwrap();
        assert!(capture.enabled());

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["direction"], "system_init");
        assert_eq!(lines[0]["payload"]["format_version"], FORMAT_VERSION);
    }

    #[tokio::test]
    async fn test_entries_flushed_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.log");
        let capture = BufferedWireCapture::new(
            &path,
            Arc::new(ApiKeyRedactor::new(Vec::<String>::new())),
            &logging(None, 0),
        )
        .unwrap();

        let target = target();
        capture
            .capture_outbound_request(&target, &json!({"n": 1}))
            .await;
        capture
            .capture_inbound_response(&target, &json!({"n": 2}))
            .await;
        capture.flush().await;

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1]["direction"], "outbound_request");
        assert_eq!(lines[2]["direction"], "inbound_response");
        assert_eq!(lines[1]["session_id"], "s1");
        assert_eq!(lines[1]["key_name"], "openai-1");
    }

    #[tokio::test]
    async fn test_payload_redacted_in_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.log");
        let secret = "sk-AAAAAAAAAAAAAAAAAAAA";
        let capture = BufferedWireCapture::new(
            &path,
            Arc::new(ApiKeyRedactor::new(vec![secret.to_string()])),
            &logging(None, 0),
        )
        .unwrap();

        capture
            .capture_outbound_request(&target(), &json!({"content": format!("key {secret}")}))
            .await;
        capture.shutdown().await;

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains(secret));
        assert!(raw.contains("(API_KEY_HAS_BEEN_REDACTED)"));
    }

    #[tokio::test]
    async fn test_stream_wrapper_emits_markers_and_forwards_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.log");
        let capture = BufferedWireCapture::new(
            &path,
            Arc::new(ApiKeyRedactor::new(Vec::<String>::new())),
            &logging(None, 0),
        )
        .unwrap();

        let chunks: Vec<crate::error::Result<Vec<u8>>> =
            vec![Ok(b"one".to_vec()), Ok(b"two".to_vec()), Ok(b"three".to_vec())];
        let stream: ByteStream = Box::pin(futures::stream::iter(chunks));
        let wrapped = capture.wrap_inbound_stream(target(), stream);

        let collected: Vec<Vec<u8>> = wrapped.map(|item| item.unwrap()).collect().await;
        assert_eq!(collected, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);

        capture.shutdown().await;
        let lines = read_lines(&path);
        let directions: Vec<&str> = lines
            .iter()
            .skip(1)
            .map(|line| line["direction"].as_str().unwrap())
            .collect();
        assert_eq!(
            directions,
            vec![
                "stream_start",
                "stream_chunk",
                "stream_chunk",
                "stream_chunk",
                "stream_end"
            ]
        );
        let end = lines.last().unwrap();
        assert_eq!(end["payload"]["total_chunks"], 3);
        assert_eq!(end["payload"]["total_bytes"], 11);
        assert_eq!(lines[2]["metadata"]["chunk_number"], 1);
        assert_eq!(lines[2]["metadata"]["chunk_bytes"], 3);
    }

    #[tokio::test]
    async fn test_rotation_preserves_generations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.log");
        let capture = BufferedWireCapture::new(
            &path,
            Arc::new(ApiKeyRedactor::new(Vec::<String>::new())),
            &logging(Some(256), 2),
        )
        .unwrap();

        for n in 0..20 {
            capture
                .capture_outbound_request(&target(), &json!({"n": n, "pad": "x".repeat(64)}))
                .await;
        }
        capture.shutdown().await;

        let rotated = generation_path(&path, 1);
        assert!(rotated.exists(), "expected {} to exist", rotated.display());
    }
}
