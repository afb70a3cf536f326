//! Error taxonomy
//!
//! Two layers:
//! - `ErrorCode` - recoverable, tool-level failures. These never abort a
//!   conversation; they are rendered into a tool result and fed back to the model.
//! - `GatewayError` - orchestration-fatal and setup errors surfaced to the client.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable code attached to every failed tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    PolicyDenied,
    InvalidArgument,
    NotFound,
    PreconditionFailed,
    FileTooLarge,
    Timeout,
    UnsupportedTool,
    ApprovalRequired,
    ToolError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::PolicyDenied => "policy_denied",
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::NotFound => "not_found",
            ErrorCode::PreconditionFailed => "precondition_failed",
            ErrorCode::FileTooLarge => "file_too_large",
            ErrorCode::Timeout => "timeout",
            ErrorCode::UnsupportedTool => "unsupported_tool",
            ErrorCode::ApprovalRequired => "approval_required",
            ErrorCode::ToolError => "tool_error",
        }
    }

    /// Map an I/O failure onto the closest tool-level code.
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ErrorCode::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorCode::PolicyDenied,
            std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData => {
                ErrorCode::InvalidArgument
            }
            _ => ErrorCode::ToolError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that terminate a request or prevent startup.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("malformed backend response: {0}")]
    MalformedBackendResponse(String),

    #[error("backend returned {status}: {message}")]
    BackendStatus { status: u16, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Stable identifier used in client-facing error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::BackendUnavailable(_) => "backend_unavailable",
            GatewayError::MalformedBackendResponse(_) => "malformed_backend_response",
            GatewayError::BackendStatus { .. } => "backend_error",
            GatewayError::Config(_) => "config_error",
            GatewayError::Io(_) => "io_error",
        }
    }
}
