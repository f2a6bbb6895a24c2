//! Shared types for the engine.
//!
//! Catalog structures (servers, tool schemas, routing) as they appear in the
//! catalog file, the engine tuning block, and the normalized call result.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::Content;

// ─── Servers ─────────────────────────────────────────────────────────────────

/// How to start a tool server process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the process.
    #[serde(default)]
    pub cwd: Option<String>,
}

/// A configured tool server. Immutable after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub id: String,
    #[serde(flatten)]
    pub launch: LaunchSpec,
    /// Priority bucket; lower tiers are preferred when several servers can
    /// serve the same tool.
    #[serde(default)]
    pub tier: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Callers allowed to use this server. Empty means every caller.
    #[serde(default)]
    pub visibility: Vec<String>,
}

impl ServerDescriptor {
    /// Whether `caller` may route calls to this server.
    pub fn visible_to(&self, caller: Option<&str>) -> bool {
        if self.visibility.is_empty() {
            return true;
        }
        caller.is_some_and(|c| self.visibility.iter().any(|v| v == c))
    }
}

fn default_true() -> bool {
    true
}

// ─── Tool Schemas ────────────────────────────────────────────────────────────

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "number")]
    Float,
    #[serde(alias = "bool")]
    Boolean,
    #[serde(alias = "list")]
    Array,
    #[serde(alias = "map")]
    Object,
    Any,
}

impl ParamType {
    /// JSON Schema type name, used when describing tools.
    pub fn json_schema_name(self) -> Option<&'static str> {
        match self {
            Self::String => Some("string"),
            Self::Integer => Some("integer"),
            Self::Float => Some("number"),
            Self::Boolean => Some("boolean"),
            Self::Array => Some("array"),
            Self::Object => Some("object"),
            Self::Any => None,
        }
    }
}

/// A required parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    /// Alternate argument names accepted for this parameter.
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// An optional parameter with an optional default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionalParam {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Declared schema for one tool. Immutable after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub id: String,
    /// Owning server.
    pub server: String,
    /// Further servers able to serve the same tool.
    #[serde(default)]
    pub also_served_by: Vec<String>,
    #[serde(default)]
    pub required: Vec<ParamSpec>,
    #[serde(default)]
    pub optional: Vec<OptionalParam>,
    #[serde(default)]
    pub description: String,
}

impl ToolSchema {
    /// Owning server first, then the additional servers in catalog order.
    pub fn serving_servers(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.server.as_str()).chain(self.also_served_by.iter().map(String::as_str))
    }

    /// JSON Schema rendering of the parameter list.
    pub fn parameter_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        for p in &self.required {
            properties.insert(p.name.clone(), type_schema(p.ty, None));
        }
        for p in &self.optional {
            properties.insert(p.name.clone(), type_schema(p.ty, p.default.as_ref()));
        }
        let required: Vec<&str> = self.required.iter().map(|p| p.name.as_str()).collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

fn type_schema(ty: ParamType, default: Option<&serde_json::Value>) -> serde_json::Value {
    let mut schema = serde_json::Map::new();
    if let Some(name) = ty.json_schema_name() {
        schema.insert("type".into(), name.into());
    }
    if let Some(default) = default {
        schema.insert("default".into(), default.clone());
    }
    serde_json::Value::Object(schema)
}

// ─── Routing ─────────────────────────────────────────────────────────────────

/// Alias → canonical tool, with optional routing preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynonymEntry {
    pub alias: String,
    pub tool: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub fallback: Option<String>,
}

// ─── Catalog ─────────────────────────────────────────────────────────────────

/// Top-level catalog file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub servers: Vec<ServerDescriptor>,
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
    #[serde(default)]
    pub routing: Vec<SynonymEntry>,
    /// Engine tuning. Absent means all defaults.
    #[serde(default)]
    pub engine: EngineConfig,
}

// ─── Engine Config ───────────────────────────────────────────────────────────

/// Session manager and dispatcher tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default per-call deadline.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Maximum queued calls per session before `Busy`.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Reconnect retries after a `ConnectionLost`, not counting the first try.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Wait before the first retry (doubles each retry).
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound for a single backoff wait.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Calls slower than this are recorded for inspection.
    #[serde(default = "default_slow_call_threshold_ms")]
    pub slow_call_threshold_ms: u64,
    /// How many slow calls to keep per session.
    #[serde(default = "default_slow_call_history")]
    pub slow_call_history: usize,
    /// Deadline for the ping sent after a timeout.
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,
    /// How long a server stays out of routing after exhausting retries.
    #[serde(default = "default_unavailable_cooldown_ms")]
    pub unavailable_cooldown_ms: u64,
    /// Deadline for the initialize handshake of a spawned server.
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,
}

fn default_call_timeout_ms() -> u64 {
    30_000
}
fn default_queue_capacity() -> usize {
    32
}
fn default_max_retry_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_cap_ms() -> u64 {
    8_000
}
fn default_slow_call_threshold_ms() -> u64 {
    5_000
}
fn default_slow_call_history() -> usize {
    64
}
fn default_health_check_timeout_ms() -> u64 {
    2_000
}
fn default_unavailable_cooldown_ms() -> u64 {
    30_000
}
fn default_init_timeout_ms() -> u64 {
    30_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            queue_capacity: default_queue_capacity(),
            max_retry_attempts: default_max_retry_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            slow_call_threshold_ms: default_slow_call_threshold_ms(),
            slow_call_history: default_slow_call_history(),
            health_check_timeout_ms: default_health_check_timeout_ms(),
            unavailable_cooldown_ms: default_unavailable_cooldown_ms(),
            init_timeout_ms: default_init_timeout_ms(),
        }
    }
}

impl EngineConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Wait before retry number `retry` (1-based): base, 2×base, 4×base, …
    /// capped at `backoff_cap_ms`.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let delay = self.backoff_base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.backoff_cap_ms))
    }
}

// ─── Call Results ────────────────────────────────────────────────────────────

/// Normalized result of a tool call.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallResult {
    pub call_id: uuid::Uuid,
    pub server: String,
    pub tool: String,
    pub content: Vec<Content>,
    /// True when the action or a requested introspection step failed. The
    /// content still carries whatever data was obtained.
    pub is_error: bool,
    pub attempts: u32,
    pub execution_time_ms: u64,
}

impl ToolCallResult {
    /// First structured payload in the content list.
    pub fn structured(&self) -> Option<&serde_json::Value> {
        self.content.iter().find_map(Content::as_json)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
