//! Session manager — one persistent connection per server.
//!
//! Each server gets a worker task that owns the connection and services a
//! bounded FIFO queue one call at a time. Callers talk to it through an
//! mpsc queue and receive their result over a oneshot channel.
//!
//! Failure policy:
//! - `ConnectionLost` tears the connection down and is retried with
//!   exponential backoff, up to `max_retry_attempts`, then surfaces as
//!   `RetriesExhausted` for the triggering call only
//! - `Timeout` cancels the wait and triggers a `ping` health check; the
//!   session is only torn down if the ping hits a transport failure
//! - Server-reported errors propagate once, untouched

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::errors::{CallContext, EngineError};
use super::lifecycle::{Connection, Connector};
use super::metrics::{MetricsSnapshot, SessionMetrics, SlowCall};
use super::registry::SchemaRegistry;
use super::transport::extract_result;
use super::types::{EngineConfig, ServerDescriptor, ToolCallResult};
use crate::protocol::{
    error_codes, methods, CallToolResult, JsonRpcError, ToolDescriptor, ToolsListResult,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// State transitions kept per session for inspection.
const STATE_LOG_CAPACITY: usize = 64;

// ─── State ───────────────────────────────────────────────────────────────────

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
    Failing,
    ShuttingDown,
}

impl SessionState {
    /// Legal edges. `Connecting → Failing` covers a failed cold connect.
    fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Ready)
                | (Connecting, Failing)
                | (Ready, Failing)
                | (Failing, Ready)
                | (ShuttingDown, Disconnected)
        ) || (next == ShuttingDown && self != ShuttingDown)
    }
}

/// Shared view of a session's state, written only by its worker.
#[derive(Debug)]
struct StateTracker {
    server: String,
    tx: watch::Sender<SessionState>,
    log: Mutex<VecDeque<SessionState>>,
    last_error: Mutex<Option<String>>,
}

impl StateTracker {
    fn new(server: &str) -> Self {
        let (tx, _) = watch::channel(SessionState::Disconnected);
        let mut log = VecDeque::with_capacity(STATE_LOG_CAPACITY);
        log.push_back(SessionState::Disconnected);
        Self {
            server: server.to_string(),
            tx,
            log: Mutex::new(log),
            last_error: Mutex::new(None),
        }
    }

    fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    fn set(&self, next: SessionState) {
        let current = self.get();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            tracing::error!(server = %self.server, from = ?current, to = ?next, "illegal session transition");
            return;
        }

        tracing::debug!(server = %self.server, from = ?current, to = ?next, "session state");
        self.tx.send_replace(next);
        if let Ok(mut log) = self.log.lock() {
            if log.len() == STATE_LOG_CAPACITY {
                log.pop_front();
            }
            log.push_back(next);
        }
    }

    fn history(&self) -> Vec<SessionState> {
        self.log
            .lock()
            .map(|log| log.iter().copied().collect())
            .unwrap_or_default()
    }

    fn set_last_error(&self, error: &EngineError) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = Some(error.to_string());
        }
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|slot| slot.clone())
    }
}

/// Snapshot of one session for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub server: String,
    pub state: SessionState,
    pub metrics: MetricsSnapshot,
    pub last_error: Option<String>,
}

// ─── Pending Calls ───────────────────────────────────────────────────────────

/// Successful raw result plus how many attempts it took.
type CallOutcome = Result<(Value, u32), EngineError>;

struct PendingCall {
    call_id: Uuid,
    method: &'static str,
    params: Option<Value>,
    context: CallContext,
    deadline: Instant,
    timeout: Duration,
    reply: oneshot::Sender<CallOutcome>,
}

impl PendingCall {
    fn timeout_error(&self, attempts: u32) -> EngineError {
        EngineError::Timeout {
            context: self.context.clone().with_attempts(attempts),
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }
}

// ─── Session Handle ──────────────────────────────────────────────────────────

struct SessionHandle {
    tx: mpsc::Sender<PendingCall>,
    state: Arc<StateTracker>,
    metrics: Arc<SessionMetrics>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

// ─── Session Manager ─────────────────────────────────────────────────────────

/// Owns every session. Sessions are created lazily on first use.
pub struct SessionManager {
    registry: Arc<SchemaRegistry>,
    connector: Arc<dyn Connector>,
    config: EngineConfig,
    /// Server id → session. Single writer: get-or-spawn happens under this lock.
    sessions: Mutex<HashMap<String, Arc<SessionHandle>>>,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(registry: Arc<SchemaRegistry>, connector: Arc<dyn Connector>) -> Self {
        let config = registry.engine_config().clone();
        Self {
            registry,
            connector,
            config,
            sessions: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute a validated tool call on `server`.
    ///
    /// `timeout` overrides the configured per-call deadline.
    pub async fn call(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> Result<ToolCallResult, EngineError> {
        let context = CallContext::new(server, tool, &arguments);
        let params = serde_json::json!({ "name": tool, "arguments": arguments });
        let started = Instant::now();
        let call_id = Uuid::new_v4();

        let (value, attempts) = self
            .submit(server, call_id, methods::TOOLS_CALL, Some(params), context.clone(), timeout)
            .await?;

        let result: CallToolResult = serde_json::from_value(value).map_err(|e| EngineError::Internal {
            context: context.clone().with_attempts(attempts),
            message: format!("malformed tools/call result: {e}"),
            data: None,
        })?;

        Ok(ToolCallResult {
            call_id,
            server: server.to_string(),
            tool: tool.to_string(),
            content: result.content,
            is_error: result.is_error,
            attempts,
            execution_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// List the tools a server exposes, through the same queue as calls.
    pub async fn discover(
        &self,
        server: &str,
        timeout: Option<Duration>,
    ) -> Result<Vec<ToolDescriptor>, EngineError> {
        let context = CallContext::new(server, methods::TOOLS_LIST, &Value::Null);
        let (value, attempts) = self
            .submit(server, Uuid::new_v4(), methods::TOOLS_LIST, None, context.clone(), timeout)
            .await?;

        let list: ToolsListResult = serde_json::from_value(value).map_err(|e| EngineError::Internal {
            context: context.with_attempts(attempts),
            message: format!("malformed tools/list result: {e}"),
            data: None,
        })?;
        Ok(list.tools)
    }

    async fn submit(
        &self,
        server: &str,
        call_id: Uuid,
        method: &'static str,
        params: Option<Value>,
        context: CallContext,
        timeout: Option<Duration>,
    ) -> CallOutcome {
        if self.shutdown.is_cancelled() {
            return Err(EngineError::ShuttingDown { context });
        }
        let handle = self.session(server)?;

        let timeout = timeout.unwrap_or_else(|| self.config.call_timeout());
        let started = Instant::now();
        let deadline = started + timeout;
        let (reply_tx, reply_rx) = oneshot::channel();

        let pending = PendingCall {
            call_id,
            method,
            params,
            context: context.clone(),
            deadline,
            timeout,
            reply: reply_tx,
        };

        tracing::debug!(%call_id, server, tool = %context.tool, args = %context.arguments, "call queued");

        if let Err(e) = handle.tx.try_send(pending) {
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => {
                    handle.metrics.record_busy();
                    tracing::warn!(%call_id, server, "session queue full");
                    EngineError::Busy {
                        context,
                        capacity: self.config.queue_capacity,
                    }
                }
                mpsc::error::TrySendError::Closed(_) => EngineError::ShuttingDown { context },
            });
        }

        let outcome = match timeout_at(deadline, reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(EngineError::Internal {
                context: context.clone(),
                message: "session worker dropped the call".into(),
                data: None,
            }),
            Err(_) => Err(EngineError::Timeout {
                context: context.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        let elapsed = started.elapsed();
        if let Err(e) = &outcome {
            if matches!(e, EngineError::Timeout { .. }) {
                handle.metrics.record_timeout();
            }
            tracing::warn!(%call_id, server, elapsed_ms = elapsed.as_millis() as u64, error = %e, "call failed");
        } else {
            tracing::debug!(%call_id, server, elapsed_ms = elapsed.as_millis() as u64, "call completed");
        }
        handle
            .metrics
            .record_call(call_id, &context.tool, elapsed, outcome.is_err());

        outcome
    }

    /// Get the session for `server`, spawning its worker on first use.
    fn session(&self, server: &str) -> Result<Arc<SessionHandle>, EngineError> {
        let descriptor = self
            .registry
            .get_server(server)
            .ok_or_else(|| EngineError::server_not_found(server))?;

        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(handle) = sessions.get(server) {
            return Ok(Arc::clone(handle));
        }

        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let state = Arc::new(StateTracker::new(server));
        let metrics = Arc::new(SessionMetrics::new(
            Duration::from_millis(self.config.slow_call_threshold_ms),
            self.config.slow_call_history,
        ));

        let worker = Worker {
            server: descriptor,
            connector: Arc::clone(&self.connector),
            config: self.config.clone(),
            connection: None,
            state: Arc::clone(&state),
            metrics: Arc::clone(&metrics),
            shutdown: self.shutdown.child_token(),
            rx,
        };
        let join = tokio::spawn(worker.run());

        let handle = Arc::new(SessionHandle {
            tx,
            state,
            metrics,
            worker: Mutex::new(Some(join)),
        });
        sessions.insert(server.to_string(), Arc::clone(&handle));
        tracing::debug!(server, "session created");
        Ok(handle)
    }

    fn existing(&self, server: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().ok()?.get(server).cloned()
    }

    // ─── Inspection ──────────────────────────────────────────────────────

    /// Current state; `Disconnected` for a server never used.
    pub fn state(&self, server: &str) -> SessionState {
        self.existing(server)
            .map(|h| h.state.get())
            .unwrap_or(SessionState::Disconnected)
    }

    /// Recorded state transitions, oldest first.
    pub fn state_history(&self, server: &str) -> Vec<SessionState> {
        self.existing(server)
            .map(|h| h.state.history())
            .unwrap_or_else(|| vec![SessionState::Disconnected])
    }

    /// Watch state changes of an existing session.
    pub fn subscribe(&self, server: &str) -> Option<watch::Receiver<SessionState>> {
        self.existing(server).map(|h| h.state.tx.subscribe())
    }

    pub fn metrics(&self, server: &str) -> Option<MetricsSnapshot> {
        self.existing(server).map(|h| h.metrics.snapshot())
    }

    pub fn slow_calls(&self, server: &str) -> Vec<SlowCall> {
        self.existing(server)
            .map(|h| h.metrics.slow_calls())
            .unwrap_or_default()
    }

    pub fn last_error(&self, server: &str) -> Option<String> {
        self.existing(server).and_then(|h| h.state.last_error())
    }

    /// Status of every session created so far, sorted by server id.
    pub fn statuses(&self) -> Vec<SessionStatus> {
        let Ok(sessions) = self.sessions.lock() else {
            return Vec::new();
        };
        let mut statuses: Vec<SessionStatus> = sessions
            .iter()
            .map(|(server, h)| SessionStatus {
                server: server.clone(),
                state: h.state.get(),
                metrics: h.metrics.snapshot(),
                last_error: h.state.last_error(),
            })
            .collect();
        statuses.sort_by(|a, b| a.server.cmp(&b.server));
        statuses
    }

    // ─── Shutdown ────────────────────────────────────────────────────────

    /// Resolve every queued and in-flight call with `ShuttingDown`, close
    /// every connection and wait for the workers to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let handles: Vec<Arc<SessionHandle>> = match self.sessions.lock() {
            Ok(sessions) => sessions.values().cloned().collect(),
            Err(_) => Vec::new(),
        };

        for handle in handles {
            let join = handle.worker.lock().ok().and_then(|mut slot| slot.take());
            if let Some(join) = join {
                if let Err(e) = join.await {
                    tracing::error!(server = %handle.state.server, error = %e, "session worker panicked");
                }
            }
        }
        tracing::info!("session manager shut down");
    }
}

// ─── Worker ──────────────────────────────────────────────────────────────────

/// Why one attempt failed.
enum AttemptError {
    /// Transport-level failure; retried.
    Lost(String),
    /// Anything else; propagated once.
    Call(EngineError),
}

struct Worker {
    server: Arc<ServerDescriptor>,
    connector: Arc<dyn Connector>,
    config: EngineConfig,
    connection: Option<Box<dyn Connection>>,
    state: Arc<StateTracker>,
    metrics: Arc<SessionMetrics>,
    shutdown: CancellationToken,
    rx: mpsc::Receiver<PendingCall>,
}

impl Worker {
    async fn run(mut self) {
        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(call) => self.handle(call, &shutdown).await,
                    None => break,
                },
            }
        }
        self.drain().await;
    }

    async fn handle(&mut self, call: PendingCall, shutdown: &CancellationToken) {
        if call.reply.is_closed() {
            tracing::debug!(call_id = %call.call_id, server = %self.server.id, "caller gone, skipping queued call");
            return;
        }

        let outcome = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(EngineError::ShuttingDown { context: call.context.clone() }),
            outcome = self.execute(&call) => outcome,
        };

        if let Err(e) = &outcome {
            self.state.set_last_error(e);
        }
        let timed_out = matches!(outcome, Err(EngineError::Timeout { .. }));
        let _ = call.reply.send(outcome);

        if timed_out && !shutdown.is_cancelled() {
            self.health_check().await;
        }
    }

    /// Run one call through connect → request → retry.
    async fn execute(&mut self, call: &PendingCall) -> CallOutcome {
        let mut retries = 0u32;
        loop {
            let attempts = retries + 1;
            match self.attempt(call, attempts).await {
                Ok(value) => return Ok((value, attempts)),
                Err(AttemptError::Call(e)) => return Err(e),
                Err(AttemptError::Lost(reason)) => {
                    self.teardown().await;
                    let context = call.context.clone().with_attempts(attempts);
                    let cause = EngineError::ConnectionLost {
                        context: context.clone(),
                        reason,
                    };

                    if retries >= self.config.max_retry_attempts {
                        tracing::error!(
                            call_id = %call.call_id,
                            server = %self.server.id,
                            attempts,
                            "retries exhausted"
                        );
                        return Err(EngineError::RetriesExhausted {
                            context,
                            cause: Box::new(cause),
                        });
                    }

                    retries += 1;
                    self.metrics.record_retry();
                    let delay = self.config.backoff_delay(retries);
                    tracing::warn!(
                        call_id = %call.call_id,
                        server = %self.server.id,
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %cause,
                        "connection lost, retrying"
                    );
                    tokio::time::sleep(delay).await;

                    if call.reply.is_closed() || Instant::now() >= call.deadline {
                        return Err(call.timeout_error(attempts));
                    }
                }
            }
        }
    }

    async fn attempt(&mut self, call: &PendingCall, attempts: u32) -> Result<Value, AttemptError> {
        if self.connection.is_none() {
            self.connect().await?;
        }
        if Instant::now() >= call.deadline {
            return Err(AttemptError::Call(call.timeout_error(attempts)));
        }
        let Some(connection) = self.connection.as_mut() else {
            return Err(AttemptError::Lost("no connection".into()));
        };

        match timeout_at(call.deadline, connection.request(call.method, call.params.clone())).await {
            Err(_) => {
                tracing::warn!(call_id = %call.call_id, server = %self.server.id, "call deadline passed");
                Err(AttemptError::Call(call.timeout_error(attempts)))
            }
            Ok(Err(e)) => Err(AttemptError::Lost(e.to_string())),
            Ok(Ok(response)) => extract_result(response).map_err(|err| {
                AttemptError::Call(classify_rpc_error(err, call.context.clone().with_attempts(attempts)))
            }),
        }
    }

    async fn connect(&mut self) -> Result<(), AttemptError> {
        if self.state.get() == SessionState::Disconnected {
            self.state.set(SessionState::Connecting);
        }
        tracing::info!(server = %self.server.id, "connecting");

        match self.connector.connect(&self.server).await {
            Ok(connection) => {
                self.connection = Some(connection);
                self.state.set(SessionState::Ready);
                Ok(())
            }
            Err(e) => {
                self.state.set(SessionState::Failing);
                Err(AttemptError::Lost(e.to_string()))
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        self.state.set(SessionState::Failing);
    }

    /// Ping after a timeout; only a transport failure tears down.
    async fn health_check(&mut self) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        let limit = Duration::from_millis(self.config.health_check_timeout_ms);

        match tokio::time::timeout(limit, connection.request(methods::PING, None)).await {
            Ok(Ok(_)) => tracing::debug!(server = %self.server.id, "health check passed"),
            Ok(Err(e)) => {
                tracing::warn!(server = %self.server.id, error = %e, "health check failed, tearing down");
                self.teardown().await;
            }
            Err(_) => tracing::warn!(
                server = %self.server.id,
                timeout_ms = self.config.health_check_timeout_ms,
                "health check timed out, keeping session"
            ),
        }
    }

    /// Resolve everything still queued, close the connection.
    async fn drain(&mut self) {
        self.state.set(SessionState::ShuttingDown);
        self.rx.close();
        while let Ok(call) = self.rx.try_recv() {
            let _ = call.reply.send(Err(EngineError::ShuttingDown {
                context: call.context,
            }));
        }
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        self.state.set(SessionState::Disconnected);
        tracing::debug!(server = %self.server.id, "session closed");
    }
}

/// Map a JSON-RPC error reported by the server onto the taxonomy.
fn classify_rpc_error(err: JsonRpcError, context: CallContext) -> EngineError {
    match err.code {
        error_codes::METHOD_NOT_FOUND => EngineError::MethodNotFound {
            context,
            message: err.message,
        },
        error_codes::INVALID_PARAMS => EngineError::InvalidParams {
            context,
            message: err.message,
            data: err.data,
        },
        error_codes::INTERNAL_ERROR => EngineError::Internal {
            context,
            message: err.message,
            data: err.data,
        },
        code => EngineError::ToolExecution {
            context,
            code,
            message: err.message,
            data: err.data,
        },
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
