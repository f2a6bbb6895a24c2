//! Wire protocol shared by the engine and the executor.
//!
//! Newline-delimited JSON-RPC 2.0 over a child process's stdio, with
//! MCP-style `initialize`, `tools/list`, `tools/call` and `ping` methods.

pub mod content;
pub mod jsonrpc;

pub use content::{
    CallToolParams, CallToolResult, Content, InitializeResult, ServerInfo, ToolDescriptor,
    ToolsListResult,
};
pub use jsonrpc::{error_codes, JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// Method names understood by tool servers.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const PING: &str = "ping";
    pub const SHUTDOWN: &str = "shutdown";
}
