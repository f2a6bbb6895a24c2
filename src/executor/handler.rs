//! Server-side protocol handler.
//!
//! Reads newline-delimited JSON-RPC requests, runs each one in its own task
//! and writes responses through a single writer task. A line that is not
//! valid UTF-8 or not valid JSON gets a parse error. A `shutdown`
//! notification stops the read loop, resolves every in-flight request with
//! a cancellation error and skips actions still queued on the lane.
//!
//! Each `tools/call` moves through these phases, logged at debug level:
//! Received, Validating, then Rejected or Executing, then Completed, Failed
//! or TimedOut, then Serialized and Returned.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::action::{compose, ComposedAction};
use super::config::ExecutorConfig;
use super::errors::{ExecutorError, ProviderError};
use super::lane::ExecutionLane;
use super::params::Params;
use super::provider::{CapabilityProvider, HeadlessProvider};
use super::result::ActionResult;
use super::subject::{ProcessSubjects, SubjectSource};
use super::tools;
use crate::protocol::{
    error_codes, methods, CallToolParams, CallToolResult, InitializeResult, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, ServerInfo, ToolsListResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallPhase {
    Received,
    Validating,
    Rejected,
    Executing,
    Completed,
    Failed,
    TimedOut,
    Serialized,
    Returned,
}

fn phase(call_id: &str, tool: &str, phase: CallPhase) {
    tracing::debug!(call_id, tool, phase = ?phase, "tool call phase");
}

pub struct ActionExecutor {
    config: ExecutorConfig,
    provider: Arc<dyn CapabilityProvider>,
    subjects: Arc<dyn SubjectSource>,
    lane: ExecutionLane,
    shutdown: CancellationToken,
}

impl ActionExecutor {
    /// Must be called inside a tokio runtime (spawns the execution lane).
    pub fn new(
        config: ExecutorConfig,
        provider: Arc<dyn CapabilityProvider>,
        subjects: Arc<dyn SubjectSource>,
    ) -> Self {
        let lane = ExecutionLane::spawn(config.lane_capacity);
        Self {
            config,
            provider,
            subjects,
            lane,
            shutdown: CancellationToken::new(),
        }
    }

    /// Executor backed by the headless provider and the OS process table.
    pub fn headless(config: ExecutorConfig) -> Self {
        let provider = Arc::new(HeadlessProvider::new(config.history_capacity));
        let subjects = Arc::new(ProcessSubjects::new(config.foreground_pid));
        Self::new(config, provider, subjects)
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    // ─── Requests ────────────────────────────────────────────────────────

    /// Answer one request that carries an id.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id;
        match self.dispatch(request).await {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::failure(id, e.to_rpc_error()),
        }
    }

    async fn dispatch(&self, request: JsonRpcRequest) -> Result<serde_json::Value, ExecutorError> {
        match request.method.as_str() {
            methods::INITIALIZE => to_value(InitializeResult {
                capabilities: serde_json::json!({ "tools": {} }),
                tools: tools::descriptors(),
                server_info: Some(ServerInfo {
                    name: Some(self.config.server_name.clone()),
                    version: Some(env!("CARGO_PKG_VERSION").to_string()),
                }),
            }),
            methods::TOOLS_LIST => to_value(ToolsListResult {
                tools: tools::descriptors(),
            }),
            methods::TOOLS_CALL => {
                let params: CallToolParams =
                    serde_json::from_value(request.params.unwrap_or_default())
                        .map_err(|e| ExecutorError::invalid("params", e.to_string()))?;
                to_value(self.call_tool(params).await?)
            }
            methods::PING => Ok(serde_json::json!({})),
            other => Err(ExecutorError::MethodNotFound {
                name: other.to_string(),
            }),
        }
    }

    /// Run one tool call through validation, execution and result assembly.
    pub async fn call_tool(&self, params: CallToolParams) -> Result<CallToolResult, ExecutorError> {
        let call_id = uuid::Uuid::new_v4().to_string();
        let tool = params.name.as_str();
        phase(&call_id, tool, CallPhase::Received);

        if !tools::is_known(tool) {
            phase(&call_id, tool, CallPhase::Rejected);
            return Err(ExecutorError::MethodNotFound {
                name: tool.to_string(),
            });
        }

        phase(&call_id, tool, CallPhase::Validating);
        let composed = Params::from_value(params.arguments)
            .and_then(|p| compose(tool, &p, self.subjects.as_ref(), &self.config));
        let composed = match composed {
            Ok(c) => c,
            Err(e) => {
                phase(&call_id, tool, CallPhase::Rejected);
                tracing::info!(call_id = %call_id, tool, error = %e, "tool call rejected");
                return Err(e);
            }
        };

        phase(&call_id, tool, CallPhase::Executing);
        let provider = Arc::clone(&self.provider);
        let result = if composed.descriptor.kind.touches_ui() {
            self.lane.run(execute(provider, composed), &self.shutdown).await?
        } else {
            execute(provider, composed).await
        };

        let outcome = match &result.action {
            Ok(_) => CallPhase::Completed,
            Err(_) if result.timed_out => CallPhase::TimedOut,
            Err(_) => CallPhase::Failed,
        };
        phase(&call_id, tool, outcome);
        tracing::info!(
            call_id = %call_id,
            tool,
            is_error = result.is_error(),
            elapsed_ms = result.duration_ms,
            "tool call finished"
        );

        let call_result = result.into_call_result();
        phase(&call_id, tool, CallPhase::Serialized);
        phase(&call_id, tool, CallPhase::Returned);
        Ok(call_result)
    }

    // ─── Serve Loop ──────────────────────────────────────────────────────

    /// Serve requests until EOF or a `shutdown` notification.
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: W) -> std::io::Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let cancel = self.shutdown.clone();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
        let writer_task = tokio::spawn(write_responses(writer, out_rx));

        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut in_flight = JoinSet::new();

        tracing::info!(server = %self.config.server_name, "executor serving");

        loop {
            tokio::select! {
                read = reader.read_until(b'\n', &mut buf) => {
                    match read {
                        Ok(0) if buf.is_empty() => {
                            tracing::info!("input closed");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to read request");
                            break;
                        }
                    }
                    let raw = std::mem::take(&mut buf);
                    let Ok(line) = std::str::from_utf8(&raw) else {
                        let error = JsonRpcError::new(error_codes::PARSE_ERROR, "parse error: request is not valid UTF-8");
                        let _ = out_tx.send(JsonRpcResponse::failure(None, error));
                        continue;
                    };
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
                        Ok(r) => r,
                        Err(e) => {
                            let error = JsonRpcError::new(error_codes::PARSE_ERROR, format!("parse error: {e}"));
                            let _ = out_tx.send(JsonRpcResponse::failure(None, error));
                            continue;
                        }
                    };

                    if request.is_notification() {
                        if request.method == methods::SHUTDOWN {
                            tracing::info!(in_flight = in_flight.len(), "shutdown requested");
                            cancel.cancel();
                            break;
                        }
                        tracing::debug!(method = %request.method, "ignoring notification");
                        continue;
                    }

                    let this = Arc::clone(&self);
                    let tx = out_tx.clone();
                    let cancel = cancel.clone();
                    in_flight.spawn(async move {
                        let id = request.id;
                        let response = tokio::select! {
                            _ = cancel.cancelled() => {
                                JsonRpcResponse::failure(id, ExecutorError::Cancelled.to_rpc_error())
                            }
                            response = this.handle_request(request) => response,
                        };
                        let _ = tx.send(response);
                    });
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        while in_flight.join_next().await.is_some() {}
        drop(out_tx);
        writer_task
            .await
            .map_err(std::io::Error::other)?
    }
}

// ─── Execution ───────────────────────────────────────────────────────────────

async fn execute(provider: Arc<dyn CapabilityProvider>, composed: ComposedAction) -> ActionResult {
    let started = Instant::now();
    let ComposedAction {
        descriptor,
        options,
        ignored_modifiers,
    } = composed;
    let subject = descriptor.subject.as_ref();

    let before = if options.snapshot_before {
        Some(provider.snapshot(subject).await.map_err(|e| e.to_string()))
    } else {
        None
    };

    if options.visual_feedback && descriptor.kind.touches_ui() {
        tracing::debug!(
            tool = %descriptor.tool,
            duration_ms = options.feedback_duration.as_millis() as u64,
            "showing visual feedback"
        );
        tokio::time::sleep(options.feedback_duration).await;
    }

    let action = provider.perform(&descriptor, &options).await;
    let timed_out = matches!(action, Err(ProviderError::TimedOut { .. }));

    if !options.step_delay.is_zero() {
        tokio::time::sleep(options.step_delay).await;
    }

    let after = if options.snapshot_after {
        Some(provider.snapshot(subject).await.map_err(|e| e.to_string()))
    } else {
        None
    };

    ActionResult {
        tool: descriptor.tool.clone(),
        action: action.map_err(|e| e.to_string()),
        before,
        after,
        subject: descriptor.subject.clone(),
        ignored_modifiers,
        timed_out,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

async fn write_responses<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<JsonRpcResponse>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_string(&response)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

fn to_value(value: impl serde::Serialize) -> Result<serde_json::Value, ExecutorError> {
    serde_json::to_value(value).map_err(|e| ExecutorError::internal("failed to serialize result", e))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::subject::tests::FixedSubjects;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt};

    fn executor() -> ActionExecutor {
        ActionExecutor::new(
            ExecutorConfig::default(),
            Arc::new(HeadlessProvider::new(16)),
            Arc::new(FixedSubjects),
        )
    }

    fn call(name: &str, arguments: Value) -> CallToolParams {
        CallToolParams {
            name: name.into(),
            arguments,
        }
    }

    #[tokio::test]
    async fn test_click_uses_default_subject() {
        let result = executor()
            .call_tool(call("click", json!({"x": 10, "y": 20})))
            .await
            .unwrap();
        assert!(!result.is_error);
        let body = result.structured().unwrap();
        assert_eq!(body["subject"]["pid"], 4242);
        assert_eq!(body["subject"]["name"], "Finder");
        assert_eq!(body["subject"]["defaulted"], true);
        assert_eq!(body["action"]["ok"], true);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_method_not_found() {
        let err = executor()
            .call_tool(call("teleport", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_params_name_the_field() {
        let request = JsonRpcRequest::new(
            7,
            methods::TOOLS_CALL,
            Some(json!({"name": "click", "arguments": {"x": 1}})),
        );
        let response = executor().handle_request(request).await;
        assert_eq!(response.id, Some(7));
        let error = response.error.unwrap();
        assert_eq!(error.code, error_codes::INVALID_PARAMS);
        assert_eq!(error.data.unwrap()["field"], "y");
    }

    #[tokio::test]
    async fn test_failed_snapshot_keeps_action() {
        let result = executor()
            .call_tool(call(
                "press_key",
                json!({"key": "a", "pid": 31337, "snapshot_after": true, "modifiers": ["cmd", "hyper"]}),
            ))
            .await
            .unwrap();
        assert!(result.is_error);
        let body = result.structured().unwrap();
        assert_eq!(body["action"]["ok"], true);
        assert_eq!(body["after"]["error"], "no process with pid 31337");
        assert_eq!(body["ignoredModifiers"], json!(["hyper"]));
    }

    #[tokio::test]
    async fn test_snapshot_before_sees_history() {
        let executor = executor();
        executor
            .call_tool(call("type_text", json!({"text": "hello"})))
            .await
            .unwrap();
        let result = executor
            .call_tool(call("scroll", json!({"dy": -3, "snapshot_before": true})))
            .await
            .unwrap();
        let body = result.structured().unwrap();
        let recent = body["before"]["value"]["recent"].as_array().unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0]["tool"], "type_text");
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let response = executor()
            .handle_request(JsonRpcRequest::new(1, "resources/list", None))
            .await;
        assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    async fn read_responses<R: tokio::io::AsyncBufRead + Unpin>(
        lines: &mut tokio::io::Lines<R>,
        count: usize,
    ) -> Vec<JsonRpcResponse> {
        let mut out = Vec::new();
        while out.len() < count {
            let line = lines.next_line().await.unwrap().unwrap();
            out.push(serde_json::from_str(&line).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_serve_answers_every_request() {
        let (client, server) = duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, mut client_write) = tokio::io::split(client);
        let served = tokio::spawn(Arc::new(executor()).serve(server_read, server_write));

        let requests = [
            JsonRpcRequest::new(1, methods::INITIALIZE, None),
            JsonRpcRequest::new(2, methods::TOOLS_LIST, None),
            JsonRpcRequest::new(3, methods::TOOLS_CALL, Some(json!({"name": "click", "arguments": {"x": 1, "y": 2}}))),
            JsonRpcRequest::new(4, methods::PING, None),
        ];
        let mut payload = String::new();
        for request in &requests {
            payload.push_str(&serde_json::to_string(request).unwrap());
            payload.push('\n');
        }
        payload.push_str("this is not json\n");
        client_write.write_all(payload.as_bytes()).await.unwrap();

        let mut lines = BufReader::new(client_read).lines();
        let mut responses: HashMap<Option<u64>, JsonRpcResponse> = HashMap::new();
        while responses.len() < 5 {
            let line = lines.next_line().await.unwrap().unwrap();
            let response: JsonRpcResponse = serde_json::from_str(&line).unwrap();
            responses.insert(response.id, response);
        }

        let init = responses[&Some(1)].result.clone().unwrap();
        assert_eq!(init["serverInfo"]["name"], "actionbridge");
        assert_eq!(init["tools"].as_array().unwrap().len(), 7);
        assert_eq!(responses[&Some(2)].result.as_ref().unwrap()["tools"][1]["name"], "click");
        assert_eq!(responses[&Some(3)].result.as_ref().unwrap()["isError"], false);
        assert_eq!(responses[&Some(4)].result.clone().unwrap(), json!({}));
        assert_eq!(responses[&None].error.as_ref().unwrap().code, error_codes::PARSE_ERROR);

        let shutdown = serde_json::to_string(&JsonRpcRequest::notification(methods::SHUTDOWN, None)).unwrap();
        client_write.write_all(format!("{shutdown}\n").as_bytes()).await.unwrap();
        served.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serve_survives_invalid_utf8() {
        let (client, server) = duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, mut client_write) = tokio::io::split(client);
        let served = tokio::spawn(Arc::new(executor()).serve(server_read, server_write));

        client_write.write_all(b"\xff\xfe garbage\n").await.unwrap();
        let ping = serde_json::to_string(&JsonRpcRequest::new(5, methods::PING, None)).unwrap();
        client_write.write_all(format!("{ping}\n").as_bytes()).await.unwrap();

        let mut lines = BufReader::new(client_read).lines();
        let responses = read_responses(&mut lines, 2).await;
        let parse_error = responses.iter().find(|r| r.id.is_none()).unwrap();
        assert_eq!(parse_error.error.as_ref().unwrap().code, error_codes::PARSE_ERROR);
        let pong = responses.iter().find(|r| r.id == Some(5)).unwrap();
        assert_eq!(pong.result.clone().unwrap(), json!({}));

        let shutdown = serde_json::to_string(&JsonRpcRequest::notification(methods::SHUTDOWN, None)).unwrap();
        client_write.write_all(format!("{shutdown}\n").as_bytes()).await.unwrap();
        served.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_skips_queued_actions() {
        let provider = Arc::new(HeadlessProvider::new(16));
        let executor = Arc::new(ActionExecutor::new(
            ExecutorConfig::default(),
            provider.clone(),
            Arc::new(FixedSubjects),
        ));
        let (client, server) = duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, mut client_write) = tokio::io::split(client);
        let served = tokio::spawn(executor.serve(server_read, server_write));

        let slow = JsonRpcRequest::new(
            1,
            methods::TOOLS_CALL,
            Some(json!({"name": "click", "arguments": {
                "x": 1, "y": 1, "visual_feedback": true, "feedback_duration_ms": 5_000
            }})),
        );
        let queued = JsonRpcRequest::new(
            2,
            methods::TOOLS_CALL,
            Some(json!({"name": "click", "arguments": {"x": 2, "y": 2}})),
        );
        for request in [&slow, &queued] {
            let line = serde_json::to_string(request).unwrap();
            client_write.write_all(format!("{line}\n").as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let shutdown = serde_json::to_string(&JsonRpcRequest::notification(methods::SHUTDOWN, None)).unwrap();
        client_write.write_all(format!("{shutdown}\n").as_bytes()).await.unwrap();

        let mut lines = BufReader::new(client_read).lines();
        for response in read_responses(&mut lines, 2).await {
            assert_eq!(response.error.unwrap().code, error_codes::CANCELLED);
        }
        served.await.unwrap().unwrap();

        // The started action finishes; the queued one never runs.
        tokio::time::sleep(Duration::from_secs(10)).await;
        let recent = provider.recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].summary, "left click x1 at (1, 1)");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_calls() {
        let (client, server) = duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, mut client_write) = tokio::io::split(client);
        let served = tokio::spawn(Arc::new(executor()).serve(server_read, server_write));

        let slow = JsonRpcRequest::new(
            9,
            methods::TOOLS_CALL,
            Some(json!({"name": "run_script", "arguments": {"source": "sleep 30"}})),
        );
        let ping = JsonRpcRequest::new(10, methods::PING, None);
        let mut payload = format!(
            "{}\n{}\n",
            serde_json::to_string(&slow).unwrap(),
            serde_json::to_string(&ping).unwrap()
        );
        client_write.write_all(payload.as_bytes()).await.unwrap();

        let mut lines = BufReader::new(client_read).lines();
        let first = read_responses(&mut lines, 1).await;
        assert_eq!(first[0].id, Some(10));

        payload = format!(
            "{}\n",
            serde_json::to_string(&JsonRpcRequest::notification(methods::SHUTDOWN, None)).unwrap()
        );
        client_write.write_all(payload.as_bytes()).await.unwrap();

        let cancelled = read_responses(&mut lines, 1).await;
        assert_eq!(cancelled[0].id, Some(9));
        assert_eq!(cancelled[0].error.as_ref().unwrap().code, error_codes::CANCELLED);
        served.await.unwrap().unwrap();
    }
}
