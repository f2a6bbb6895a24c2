//! Tool engine — the high-level interface for tool execution.
//!
//! Resolves an action through the dispatcher, runs it through the session
//! manager, and feeds routing availability back into the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::config::CatalogSource;
use super::dispatcher::{Dispatcher, Resolution};
use super::errors::EngineError;
use super::lifecycle::{Connector, ProcessConnector};
use super::registry::SchemaRegistry;
use super::session::{SessionManager, SessionStatus};
use super::types::ToolCallResult;
use crate::protocol::ToolDescriptor;

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Caller name, checked against server visibility.
    pub caller: Option<String>,
    /// Replaces the configured call timeout.
    pub timeout: Option<Duration>,
}

// ─── ToolEngine ──────────────────────────────────────────────────────────────

pub struct ToolEngine {
    dispatcher: Dispatcher,
    sessions: SessionManager,
}

impl ToolEngine {
    pub fn new(registry: Arc<SchemaRegistry>, connector: Arc<dyn Connector>) -> Self {
        Self {
            dispatcher: Dispatcher::new(Arc::clone(&registry)),
            sessions: SessionManager::new(registry, connector),
        }
    }

    /// Load the catalog and spawn servers as child processes on demand.
    pub fn from_source(source: &dyn CatalogSource) -> Result<Self, EngineError> {
        let registry = Arc::new(SchemaRegistry::load(source)?);
        let init_timeout = Duration::from_millis(registry.engine_config().init_timeout_ms);
        Ok(Self::new(registry, Arc::new(ProcessConnector::new(init_timeout))))
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        self.dispatcher.registry()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Resolve without executing. Never performs I/O.
    pub fn resolve(&self, action: &str, arguments: &Value) -> Result<Resolution, EngineError> {
        self.dispatcher.resolve(action, arguments)
    }

    /// Resolve and execute with default options.
    pub async fn call(&self, action: &str, arguments: Value) -> Result<ToolCallResult, EngineError> {
        self.call_with(action, arguments, &CallOptions::default()).await
    }

    /// Resolve and execute.
    ///
    /// Validation and lookup failures are returned before any session is
    /// touched.
    pub async fn call_with(
        &self,
        action: &str,
        arguments: Value,
        options: &CallOptions,
    ) -> Result<ToolCallResult, EngineError> {
        let resolution = self
            .dispatcher
            .resolve_as(options.caller.as_deref(), action, &arguments)?;

        let result = self
            .sessions
            .call(
                &resolution.server,
                &resolution.tool,
                resolution.arguments,
                options.timeout,
            )
            .await;

        match &result {
            Ok(_) => self.dispatcher.mark_available(&resolution.server),
            Err(EngineError::RetriesExhausted { .. }) => {
                self.dispatcher.mark_unavailable(&resolution.server)
            }
            Err(_) => {}
        }
        result
    }

    /// Ask a server which tools it exposes.
    pub async fn discover(&self, server: &str) -> Result<Vec<ToolDescriptor>, EngineError> {
        self.sessions.discover(server, None).await
    }

    pub fn status(&self) -> Vec<SessionStatus> {
        self.sessions.statuses()
    }

    /// Cancel everything in flight and close every connection.
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
