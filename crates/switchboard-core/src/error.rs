//! Error types for the proxy

use serde_json::{json, Value};
use thiserror::Error;

/// Proxy error taxonomy
///
/// Connectors raise typed errors; the pipeline classifies them for failover
/// and the HTTP layer maps them to status codes and an error body.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Backend {backend} error ({status}): {message}")]
    Backend {
        backend: String,
        status: u16,
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Loop detected: {0}")]
    LoopDetection(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// HTTP status code for the client-facing response.
    ///
    /// Upstream 401/403 are surfaced as 502 to hide the upstream identity.
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::Authentication(_) => 401,
            ProxyError::InvalidRequest(_)
            | ProxyError::Configuration(_)
            | ProxyError::LoopDetection(_) => 400,
            ProxyError::Backend { status, .. } => match *status {
                401 | 403 => 502,
                s if s >= 400 => s,
                _ => 502,
            },
            ProxyError::RateLimit { .. } => 429,
            ProxyError::ServiceUnavailable(_) => 503,
            ProxyError::Json(_) | ProxyError::Io(_) | ProxyError::Internal(_) => 500,
        }
    }

    /// Machine-readable error type label for the response body.
    pub fn error_type(&self) -> &'static str {
        match self {
            ProxyError::Authentication(_) => "authentication_error",
            ProxyError::InvalidRequest(_) => "invalid_request_error",
            ProxyError::Configuration(_) => "configuration_error",
            ProxyError::Backend { .. } => "backend_error",
            ProxyError::RateLimit { .. } => "rate_limit_exceeded",
            ProxyError::ServiceUnavailable(_) => "service_unavailable",
            ProxyError::LoopDetection(_) => "loop_detection_error",
            ProxyError::Json(_) => "invalid_request_error",
            ProxyError::Io(_) | ProxyError::Internal(_) => "server_error",
        }
    }

    /// Whether the failover engine may retry on another route element.
    ///
    /// Network failures, 5xx, 408 and 429 are retryable; auth failures and
    /// other client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProxyError::ServiceUnavailable(_) => true,
            ProxyError::RateLimit { .. } => true,
            ProxyError::Backend { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    /// Seconds the client should wait before retrying, when the upstream
    /// communicated a reset time.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ProxyError::RateLimit {
                retry_after_secs, ..
            } => *retry_after_secs,
            ProxyError::Backend {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    /// JSON error body in the `{"error": {...}}` envelope all routes share.
    pub fn to_body(&self) -> Value {
        json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "code": self.status_code(),
            }
        })
    }
}

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;
