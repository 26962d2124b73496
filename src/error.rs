//! Error kinds recorded against failed steps, and the typed failure a tool
//! invocation can produce.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a step failure, as written into the execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownTool,
    MissingArgument,
    InvalidArgument,
    NotFound,
    Timeout,
    PermissionDenied,
    ExecutionError,
    SandboxUnavailable,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownTool => "unknown_tool",
            ErrorKind::MissingArgument => "missing_argument",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::ExecutionError => "execution_error",
            ErrorKind::SandboxUnavailable => "sandbox_unavailable",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure raised by a tool, the sandbox, or the policy gate in front of them.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("missing required argument: {0}")]
    MissingArgument(String),

    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Execution(String),
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::UnknownTool(_) => ErrorKind::UnknownTool,
            ToolError::MissingArgument(_) => ErrorKind::MissingArgument,
            ToolError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            ToolError::NotFound(_) => ErrorKind::NotFound,
            ToolError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            ToolError::Timeout { .. } => ErrorKind::Timeout,
            ToolError::SandboxUnavailable(_) => ErrorKind::SandboxUnavailable,
            ToolError::Cancelled => ErrorKind::Cancelled,
            ToolError::Execution(_) => ErrorKind::ExecutionError,
        }
    }

    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ToolError::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => ToolError::NotFound(e.to_string()),
            std::io::ErrorKind::PermissionDenied => ToolError::PermissionDenied(e.to_string()),
            _ => ToolError::Execution(e.to_string()),
        }
    }
}

pub type ToolResult<T> = std::result::Result<T, ToolError>;
