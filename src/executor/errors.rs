//! Executor error types.
//!
//! `ExecutorError` is what a request can fail with at the protocol level;
//! it maps one-to-one onto JSON-RPC error codes. `ProviderError` is a
//! domain failure of a capability provider and ends up inside the
//! action result, never as a protocol error.

use thiserror::Error;

use crate::protocol::{error_codes, JsonRpcError};

/// Protocol-level failures of a request.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Unknown method or tool name.
    #[error("method not found: '{name}'")]
    MethodNotFound { name: String },

    /// A parameter is missing or has the wrong type.
    #[error("invalid parameter '{field}': {reason}")]
    InvalidParams { field: String, reason: String },

    /// Anything else. `cause` is carried in the error's `data`.
    #[error("internal error: {reason}")]
    Internal { reason: String, cause: Option<String> },

    /// The executor is shutting down.
    #[error("executor shutting down")]
    Cancelled,
}

impl ExecutorError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParams {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn internal(reason: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Internal {
            reason: reason.into(),
            cause: Some(cause.to_string()),
        }
    }

    /// JSON-RPC error code for this failure.
    pub fn code(&self) -> i32 {
        match self {
            Self::MethodNotFound { .. } => error_codes::METHOD_NOT_FOUND,
            Self::InvalidParams { .. } => error_codes::INVALID_PARAMS,
            Self::Internal { .. } => error_codes::INTERNAL_ERROR,
            Self::Cancelled => error_codes::CANCELLED,
        }
    }

    /// Wire form, with the offending field or the cause in `data`.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let message = self.to_string();
        match self {
            Self::InvalidParams { field, .. } => {
                JsonRpcError::with_data(self.code(), message, serde_json::json!({ "field": field }))
            }
            Self::Internal {
                cause: Some(cause), ..
            } => JsonRpcError::with_data(self.code(), message, serde_json::json!({ "cause": cause })),
            _ => JsonRpcError::new(self.code(), message),
        }
    }
}

/// Failures reported by a capability provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider tried and failed. The reason is shown verbatim.
    #[error("{reason}")]
    Failed { reason: String },

    /// The provider cannot perform this kind of action.
    #[error("action '{action}' is not supported by this provider")]
    Unsupported { action: String },

    /// The action ran past its time limit and was cancelled.
    #[error("timed out after {after_ms}ms")]
    TimedOut { after_ms: u64 },
}

impl ProviderError {
    pub(crate) fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}
