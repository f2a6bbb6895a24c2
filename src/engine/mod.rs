//! Tool-invocation engine — the caller side.
//!
//! This module handles:
//! - Loading and validating the server and tool catalog
//! - Resolving loose action names and repairing arguments
//! - One persistent connection per server, with retry and backoff
//! - Spawning server processes and speaking JSON-RPC over their stdio

pub mod client;
pub mod coercion;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod lifecycle;
pub mod metrics;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::{CallOptions, ToolEngine};
pub use config::{CatalogFile, CatalogSource};
pub use dispatcher::{Dispatcher, Resolution, ResolvedVia};
pub use errors::{CallContext, EngineError, ErrorKind, TransportError};
pub use lifecycle::{Connection, Connector, ProcessConnector};
pub use registry::{CacheStats, SchemaRegistry};
pub use session::{SessionManager, SessionState, SessionStatus};
pub use types::{Catalog, EngineConfig, ServerDescriptor, ToolCallResult, ToolSchema};
