//! Connection seams and server process lifecycle.
//!
//! The session manager only sees [`Connector`] and [`Connection`]. The
//! production connector spawns the server as a child process, wires its
//! stdio into a [`LineTransport`] and performs the initialize handshake;
//! tests plug in connectors backed by in-memory streams.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use super::errors::{truncate_utf8, TransportError};
use super::transport::LineTransport;
use super::types::ServerDescriptor;
use crate::protocol::{methods, JsonRpcResponse};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for graceful shutdown before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for stderr after a failed startup.
const STDERR_CAPTURE_TIMEOUT: Duration = Duration::from_millis(500);

/// Maximum stderr kept in a startup error message.
const STDERR_CAPTURE_LIMIT: usize = 2000;

// ─── Seams ───────────────────────────────────────────────────────────────────

/// A live, initialized connection to one server.
#[async_trait]
pub trait Connection: Send {
    /// Send a request and wait for its response.
    async fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, TransportError>;

    /// Close the connection. Best-effort; never fails.
    async fn close(&mut self);
}

/// Opens connections to servers.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        server: &ServerDescriptor,
    ) -> Result<Box<dyn Connection>, TransportError>;
}

#[async_trait]
impl Connection for LineTransport {
    async fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        LineTransport::request(self, method, params).await
    }

    async fn close(&mut self) {
        let _ = self.notify(methods::SHUTDOWN, None).await;
    }
}

// ─── Process Connections ─────────────────────────────────────────────────────

/// A running server process with its transport.
pub struct ProcessConnection {
    transport: LineTransport,
    process: Child,
}

#[async_trait]
impl Connection for ProcessConnection {
    async fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        self.transport.request(method, params).await
    }

    async fn close(&mut self) {
        // Send shutdown notification (best-effort)
        let _ = self.transport.notify(methods::SHUTDOWN, None).await;

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.process.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.transport.server(), %status, "server exited");
            }
            _ => {
                tracing::warn!(
                    server = %self.transport.server(),
                    "server did not exit after shutdown, killing"
                );
                let _ = self.process.kill().await;
            }
        }
    }
}

/// Spawns servers as child processes speaking JSON-RPC over stdio.
#[derive(Debug, Clone)]
pub struct ProcessConnector {
    init_timeout: Duration,
}

impl ProcessConnector {
    pub fn new(init_timeout: Duration) -> Self {
        Self { init_timeout }
    }
}

#[async_trait]
impl Connector for ProcessConnector {
    async fn connect(
        &self,
        server: &ServerDescriptor,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let connection = spawn_server(server, self.init_timeout).await?;
        Ok(Box::new(connection))
    }
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Spawn a server process and perform the initialization handshake.
pub async fn spawn_server(
    server: &ServerDescriptor,
    init_timeout: Duration,
) -> Result<ProcessConnection, TransportError> {
    let name = server.id.as_str();
    let launch = &server.launch;

    let mut cmd = Command::new(&launch.command);
    cmd.args(&launch.args);
    cmd.envs(&launch.env);

    if let Some(dir) = &launch.cwd {
        cmd.current_dir(dir);
    }

    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| TransportError::SpawnFailed {
        name: name.to_string(),
        reason: format!("{e}"),
    })?;

    let stdin = child.stdin.take().ok_or_else(|| TransportError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdin".into(),
    })?;
    let stdout = child.stdout.take().ok_or_else(|| TransportError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdout".into(),
    })?;
    let stderr_handle = child.stderr.take();

    let mut transport = LineTransport::new(name, stdout, stdin);

    match tokio::time::timeout(init_timeout, transport.initialize()).await {
        Ok(Ok(init)) => {
            tracing::info!(
                server = name,
                pid = ?child.id(),
                tools = init.tools.len(),
                "server initialized"
            );
            if let Some(stderr) = stderr_handle {
                forward_stderr(name.to_string(), stderr);
            }
            Ok(ProcessConnection {
                transport,
                process: child,
            })
        }
        Ok(Err(e)) => {
            let stderr_ctx = read_stderr_on_failure(stderr_handle).await;
            if !stderr_ctx.is_empty() {
                tracing::warn!(server = name, stderr = %stderr_ctx, "server stderr captured on failure");
            }
            let _ = child.kill().await;
            Err(TransportError::InitFailed {
                name: name.to_string(),
                reason: format!("{e}{}", format_stderr_suffix(&stderr_ctx)),
            })
        }
        Err(_) => {
            let _ = child.kill().await;
            let stderr_ctx = read_stderr_on_failure(stderr_handle).await;
            if !stderr_ctx.is_empty() {
                tracing::warn!(server = name, stderr = %stderr_ctx, "server stderr captured on timeout");
            }
            Err(TransportError::InitFailed {
                name: name.to_string(),
                reason: format!(
                    "initialization timed out after {}ms{}",
                    init_timeout.as_millis(),
                    format_stderr_suffix(&stderr_ctx)
                ),
            })
        }
    }
}

/// Relay a healthy server's stderr into the log so the pipe never fills.
fn forward_stderr(server: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %server, "stderr: {line}");
        }
    });
}

/// Read any available stderr output from a failed server process.
async fn read_stderr_on_failure(stderr_handle: Option<ChildStderr>) -> String {
    let Some(mut stderr) = stderr_handle else {
        return String::new();
    };

    let mut buf = String::new();
    match tokio::time::timeout(STDERR_CAPTURE_TIMEOUT, stderr.read_to_string(&mut buf)).await {
        Ok(Ok(_)) => {
            if buf.len() > STDERR_CAPTURE_LIMIT {
                let mut truncated = truncate_utf8(&buf, STDERR_CAPTURE_LIMIT).to_string();
                truncated.push_str("...(truncated)");
                truncated
            } else {
                buf
            }
        }
        _ => String::new(),
    }
}

/// Format a stderr suffix for error messages (empty string if no stderr).
fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
