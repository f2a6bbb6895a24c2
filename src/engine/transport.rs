//! Newline-delimited JSON-RPC transport.
//!
//! Handles the byte-level side of a connection:
//! - Writing one JSON-RPC request per line
//! - Reading lines until the response with the matching `id` arrives
//! - Skipping stray output (log lines, stale responses)
//!
//! The transport is generic over any async reader/writer pair, so the same
//! code drives a child process's stdio and an in-memory duplex stream.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::errors::TransportError;
use crate::protocol::{
    error_codes, methods, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
};

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Transport ───────────────────────────────────────────────────────────────

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Bi-directional line transport, owned by exactly one session worker.
pub struct LineTransport {
    server: String,
    writer: BoxedWriter,
    reader: BufReader<BoxedReader>,
    /// Partial line carried across a cancelled read.
    line_buf: Vec<u8>,
}

impl LineTransport {
    pub fn new(
        server: &str,
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            server: server.to_string(),
            writer: Box::new(writer),
            reader: BufReader::new(Box::new(reader)),
            line_buf: Vec::new(),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Send a JSON-RPC request and wait for the matching response.
    ///
    /// Lines that are not JSON-RPC responses (including lines that are not
    /// valid UTF-8), or carry another id, are skipped. Dropping the future
    /// mid-read keeps the partial line in `line_buf`, so the next read
    /// resumes where this one stopped.
    pub async fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);
        self.write_message(&req).await?;

        loop {
            let bytes_read = self
                .reader
                .read_until(b'\n', &mut self.line_buf)
                .await
                .map_err(|e| self.io_error(format!("failed to read response: {e}")))?;

            if bytes_read == 0 && self.line_buf.is_empty() {
                return Err(TransportError::Closed {
                    server: self.server.clone(),
                });
            }

            let raw = std::mem::take(&mut self.line_buf);
            let Ok(line) = std::str::from_utf8(&raw) else {
                tracing::trace!(server = %self.server, bytes = raw.len(), "skipping non-UTF-8 line");
                continue;
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.id == Some(id) => return Ok(resp),
                Ok(resp) => {
                    tracing::debug!(
                        server = %self.server,
                        expected = id,
                        got = ?resp.id,
                        "skipping response for another request"
                    );
                }
                Err(_) => {
                    tracing::trace!(server = %self.server, line = trimmed, "skipping non-protocol line");
                }
            }
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), TransportError> {
        let note = JsonRpcRequest::notification(method, params);
        self.write_message(&note).await
    }

    /// Perform the `initialize` handshake.
    pub async fn initialize(&mut self) -> Result<InitializeResult, TransportError> {
        let response = self.request(methods::INITIALIZE, None).await?;
        let result = extract_result(response).map_err(|e| TransportError::InitFailed {
            name: self.server.clone(),
            reason: format!("[{}] {}", e.code, e.message),
        })?;

        serde_json::from_value(result).map_err(|e| TransportError::InitFailed {
            name: self.server.clone(),
            reason: format!("failed to parse initialize response: {e}"),
        })
    }

    async fn write_message(&mut self, message: &JsonRpcRequest) -> Result<(), TransportError> {
        let mut json = serde_json::to_string(message)
            .map_err(|e| self.io_error(format!("failed to serialize request: {e}")))?;
        json.push('\n');

        self.writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| self.io_error(format!("failed to write request: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| self.io_error(format!("failed to flush request: {e}")))?;
        Ok(())
    }

    fn io_error(&self, reason: String) -> TransportError {
        TransportError::Io {
            server: self.server.clone(),
            reason,
        }
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, JsonRpcError> {
    if let Some(err) = response.error {
        return Err(err);
    }

    response.result.ok_or_else(|| {
        JsonRpcError::new(
            error_codes::INTERNAL_ERROR,
            "response missing both result and error",
        )
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
