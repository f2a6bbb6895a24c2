//! Engine error types.
//!
//! `EngineError` is the single error type surfaced to callers of the engine.
//! Call-level variants carry a [`CallContext`] so a failure can be diagnosed
//! from the message alone; argument previews never contain secrets.

use std::fmt;

use sha2::{Digest, Sha256};
use thiserror::Error;

// ─── Constants ───────────────────────────────────────────────────────────────

/// String values longer than this are elided from argument previews.
const PREVIEW_VALUE_LIMIT: usize = 256;

/// Upper bound for the whole serialized preview.
const PREVIEW_TOTAL_LIMIT: usize = 1024;

/// Argument keys whose values are always redacted.
const SECRET_MARKERS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "credential",
    "cookie",
];

// ─── Call Context ────────────────────────────────────────────────────────────

/// Diagnostic context attached to every call-level error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub server: String,
    pub tool: String,
    /// Number of attempts made (1 for a call that was never retried).
    pub attempts: u32,
    /// Redacted, size-bounded view of the call arguments.
    pub arguments: String,
}

impl CallContext {
    pub fn new(server: &str, tool: &str, arguments: &serde_json::Value) -> Self {
        Self {
            server: server.to_string(),
            tool: tool.to_string(),
            attempts: 1,
            arguments: preview_arguments(arguments),
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

impl fmt::Display for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "server={} tool={} attempts={} args={}",
            self.server, self.tool, self.attempts, self.arguments
        )
    }
}

/// A single field that failed coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

// ─── ErrorKind ───────────────────────────────────────────────────────────────

/// Flat discriminant of [`EngineError`], convenient for matching and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Busy,
    ConnectionLost,
    Timeout,
    RetriesExhausted,
    ToolExecution,
    MethodNotFound,
    InvalidParams,
    Internal,
    ShuttingDown,
    Catalog,
}

// ─── EngineError ─────────────────────────────────────────────────────────────

/// Errors surfaced by the registry, dispatcher and session manager.
#[derive(Debug, Error)]
pub enum EngineError {
    /// One or more arguments missing or not coercible. All problems are
    /// reported together.
    #[error("invalid arguments for '{tool}': {}", describe_problems(.missing, .invalid))]
    Validation {
        tool: String,
        missing: Vec<String>,
        invalid: Vec<FieldError>,
    },

    /// Unknown tool, alias or server. Raised before any I/O.
    #[error("{what} not found: '{name}'")]
    NotFound {
        what: &'static str,
        name: String,
        suggestions: Vec<String>,
    },

    /// The session queue is full.
    #[error("session busy, {capacity} calls already queued ({context})")]
    Busy { context: CallContext, capacity: usize },

    /// The transport failed (process exited, pipe closed, spawn failed).
    #[error("connection lost: {reason} ({context})")]
    ConnectionLost { context: CallContext, reason: String },

    /// The call deadline passed.
    #[error("call timed out after {timeout_ms}ms ({context})")]
    Timeout { context: CallContext, timeout_ms: u64 },

    /// Reconnection retries are used up. Never retried further.
    #[error("retries exhausted after {} attempts ({context}): {cause}", .context.attempts)]
    RetriesExhausted {
        context: CallContext,
        #[source]
        cause: Box<EngineError>,
    },

    /// The server reported a domain failure.
    #[error("tool execution failed [{code}]: {message} ({context})")]
    ToolExecution {
        context: CallContext,
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The server does not know the tool or method.
    #[error("method not found: {message} ({context})")]
    MethodNotFound { context: CallContext, message: String },

    /// The server rejected the arguments.
    #[error("invalid params: {message} ({context})")]
    InvalidParams {
        context: CallContext,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Unexpected failure, with the cause attached.
    #[error("internal error: {message} ({context})")]
    Internal {
        context: CallContext,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The engine is shutting down; the call was cancelled.
    #[error("session shutting down ({context})")]
    ShuttingDown { context: CallContext },

    /// The catalog could not be read or is malformed.
    #[error("catalog error: {reason}")]
    Catalog { reason: String },
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Busy { .. } => ErrorKind::Busy,
            Self::ConnectionLost { .. } => ErrorKind::ConnectionLost,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            Self::ToolExecution { .. } => ErrorKind::ToolExecution,
            Self::MethodNotFound { .. } => ErrorKind::MethodNotFound,
            Self::InvalidParams { .. } => ErrorKind::InvalidParams,
            Self::Internal { .. } => ErrorKind::Internal,
            Self::ShuttingDown { .. } => ErrorKind::ShuttingDown,
            Self::Catalog { .. } => ErrorKind::Catalog,
        }
    }

    /// The call context, for call-level variants.
    pub fn context(&self) -> Option<&CallContext> {
        match self {
            Self::Busy { context, .. }
            | Self::ConnectionLost { context, .. }
            | Self::Timeout { context, .. }
            | Self::RetriesExhausted { context, .. }
            | Self::ToolExecution { context, .. }
            | Self::MethodNotFound { context, .. }
            | Self::InvalidParams { context, .. }
            | Self::Internal { context, .. }
            | Self::ShuttingDown { context } => Some(context),
            Self::Validation { .. } | Self::NotFound { .. } | Self::Catalog { .. } => None,
        }
    }

    /// Only transport-level failures are retried by the session layer.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }

    pub(crate) fn tool_not_found(name: &str, suggestions: Vec<String>) -> Self {
        Self::NotFound {
            what: "tool",
            name: name.to_string(),
            suggestions,
        }
    }

    pub(crate) fn server_not_found(name: &str) -> Self {
        Self::NotFound {
            what: "server",
            name: name.to_string(),
            suggestions: Vec::new(),
        }
    }

    pub(crate) fn catalog(reason: impl Into<String>) -> Self {
        Self::Catalog {
            reason: reason.into(),
        }
    }
}

fn describe_problems(missing: &[String], invalid: &[FieldError]) -> String {
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing required field(s): {}", missing.join(", ")));
    }
    for problem in invalid {
        parts.push(format!("'{}': {}", problem.field, problem.reason));
    }
    parts.join("; ")
}

// ─── TransportError ──────────────────────────────────────────────────────────

/// Low-level failures of a connection. All of them classify as
/// [`EngineError::ConnectionLost`].
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// Read, write or serialization failure on the stream.
    #[error("transport error for server '{server}': {reason}")]
    Io { server: String, reason: String },

    /// The peer closed its end of the stream.
    #[error("server '{server}' closed the stream (process may have exited)")]
    Closed { server: String },
}

// ─── Argument Previews ───────────────────────────────────────────────────────

/// Render arguments for logs and error messages.
///
/// Secret-looking keys are redacted, long strings are replaced by their
/// length and a SHA-256 prefix, and the whole preview is capped.
pub fn preview_arguments(arguments: &serde_json::Value) -> String {
    let redacted = redact_value(arguments, None);
    let rendered = serde_json::to_string(&redacted).unwrap_or_default();
    if rendered.len() > PREVIEW_TOTAL_LIMIT {
        format!("{}...(truncated)", truncate_utf8(&rendered, PREVIEW_TOTAL_LIMIT))
    } else {
        rendered
    }
}

fn redact_value(value: &serde_json::Value, key: Option<&str>) -> serde_json::Value {
    if key.is_some_and(is_secret_key) {
        return serde_json::Value::String("<redacted>".into());
    }

    match value {
        serde_json::Value::String(s) if s.len() > PREVIEW_VALUE_LIMIT => {
            let digest = format!("{:x}", Sha256::digest(s.as_bytes()));
            serde_json::Value::String(format!("<elided {} bytes sha256:{}>", s.len(), &digest[..12]))
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_value(v, Some(k))))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| redact_value(v, None)).collect())
        }
        other => other.clone(),
    }
}

fn is_secret_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SECRET_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Truncate a string to at most `max_bytes` bytes on a valid UTF-8 char boundary.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_lists_every_problem() {
        let err = EngineError::Validation {
            tool: "click".into(),
            missing: vec!["x".into(), "y".into()],
            invalid: vec![FieldError {
                field: "count".into(),
                reason: "expected integer".into(),
            }],
        };
        let msg = err.to_string();
        assert!(msg.contains("x, y"));
        assert!(msg.contains("'count': expected integer"));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_preview_redacts_secrets() {
        let args = serde_json::json!({"user": "ada", "api_key": "sk-123", "nested": {"Password": "x"}});
        let preview = preview_arguments(&args);
        assert!(preview.contains("ada"));
        assert!(!preview.contains("sk-123"));
        assert!(!preview.contains("\"x\""));
        assert!(preview.contains("<redacted>"));
    }

    #[test]
    fn test_preview_elides_large_payloads() {
        let big = "a".repeat(5000);
        let preview = preview_arguments(&serde_json::json!({"source": big}));
        assert!(preview.contains("<elided 5000 bytes sha256:"));
        assert!(preview.len() < 200);
    }

    #[test]
    fn test_retries_exhausted_keeps_cause() {
        let ctx = CallContext::new("desktop", "click", &serde_json::json!({})).with_attempts(3);
        let err = EngineError::RetriesExhausted {
            context: ctx.clone(),
            cause: Box::new(EngineError::ConnectionLost {
                context: ctx,
                reason: "pipe closed".into(),
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("after 3 attempts"));
        assert!(msg.contains("pipe closed"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_only_connection_lost_is_retriable() {
        let ctx = CallContext::new("s", "t", &serde_json::Value::Null);
        assert!(EngineError::ConnectionLost {
            context: ctx.clone(),
            reason: "gone".into()
        }
        .is_retriable());
        assert!(!EngineError::Timeout {
            context: ctx,
            timeout_ms: 10
        }
        .is_retriable());
    }

    #[test]
    fn test_truncate_utf8_respects_char_boundary() {
        let s = "héllo";
        assert_eq!(truncate_utf8(s, 2), "h");
        assert_eq!(truncate_utf8(s, 100), s);
    }
}
